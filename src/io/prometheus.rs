//! Prometheus metrics HTTP endpoint
//!
//! Exposes crossing metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with event label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    event: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{event=\"{event}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    event: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{event=\"{event}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{event=\"{event}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{event=\"{event}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{event=\"{event}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, event_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, event_id, &summary);
    write_detection_metrics(&mut output, event_id, &summary);
    write_run_metrics(&mut output, event_id, &summary);

    output
}

fn write_frame_metrics(output: &mut String, event: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "vision_frames_total",
        "Total frames processed",
        MetricType::Counter,
        event,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP vision_frames_per_sec Frames processed per second");
    let _ = writeln!(output, "# TYPE vision_frames_per_sec gauge");
    let _ = writeln!(
        output,
        "vision_frames_per_sec{{event=\"{event}\"}} {:.2}",
        summary.frames_per_sec
    );
    write_histogram(
        output,
        "vision_frame_latency_us",
        "Frame processing latency in microseconds",
        event,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_frame_latency_us,
    );
    write_metric(
        output,
        "vision_frame_latency_max_us",
        "Max frame latency since last scrape",
        MetricType::Gauge,
        event,
        summary.max_frame_latency_us,
    );
}

fn write_detection_metrics(output: &mut String, event: &str, summary: &MetricsSummary) {
    let counters = [
        ("vision_detections_total", "Detections delivered by the tracker", summary.detections_total),
        (
            "vision_detections_skipped_total",
            "Detections skipped for malformed shape",
            summary.detections_skipped,
        ),
        ("vision_boxes_rejected_total", "Boxes rejected by size validation", summary.boxes_rejected),
        ("vision_partial_crops_total", "Approach crops stored", summary.partial_crops_stored),
        ("vision_crossings_total", "Line crossings captured", summary.crossings_total),
        (
            "vision_evidence_write_failures_total",
            "Evidence images that failed to write",
            summary.evidence_write_failures,
        ),
        ("vision_state_resets_total", "Crossing state resets on identity wraparound", summary.state_resets),
        ("vision_stale_results_total", "Duplicate or out-of-order frame results dropped", summary.stale_results),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, event, val);
    }
}

fn write_run_metrics(output: &mut String, event: &str, summary: &MetricsSummary) {
    let counters = [
        ("vision_runs_started_total", "Analysis runs started", summary.runs_started),
        ("vision_runs_completed_total", "Analysis runs that exhausted the stream", summary.runs_completed),
        ("vision_runs_stopped_total", "Analysis runs ended by stop command", summary.runs_stopped),
        ("vision_runs_failed_total", "Analysis runs that failed", summary.runs_failed),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, event, val);
    }
    write_metric(
        output,
        "vision_run_active",
        "1 while an analysis run is active",
        MetricType::Gauge,
        event,
        u64::from(summary.run_active),
    );
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    event_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &event_id),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    event_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let event_id = Arc::new(event_id);

    info!(port = %port, event_id = %event_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let event_id = event_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let event_id = event_id.clone();
                                async move { handle_request(req, metrics, event_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_frame_processed(700, 4);
        metrics.record_frame_processed(1_500, 2);
        metrics.record_crossing();
        metrics.record_run_started();

        let output = format_prometheus_metrics(&metrics, "evt-1");

        assert!(output.contains("vision_frames_total{event=\"evt-1\"} 2"));
        assert!(output.contains("vision_frame_latency_us_bucket{event=\"evt-1\",le=\"1000\"} 1"));
        assert!(output.contains("vision_frame_latency_us_bucket{event=\"evt-1\",le=\"+Inf\"} 2"));
        assert!(output.contains("vision_detections_total{event=\"evt-1\"} 6"));
        assert!(output.contains("vision_crossings_total{event=\"evt-1\"} 1"));
        assert!(output.contains("vision_run_active{event=\"evt-1\"} 1"));
        assert!(output.contains("# TYPE vision_crossings_total counter"));
    }

    #[test]
    fn test_skip_and_stale_counters() {
        let metrics = Metrics::new();
        metrics.record_detection_skipped();
        metrics.record_stale_result();
        metrics.record_stale_result();

        let output = format_prometheus_metrics(&metrics, "evt-1");

        assert!(output.contains("# HELP vision_detections_skipped_total Detections skipped for malformed shape"));
        assert!(output.contains("vision_detections_skipped_total{event=\"evt-1\"} 1"));
        assert!(output.contains("vision_stale_results_total{event=\"evt-1\"} 2"));
    }
}
