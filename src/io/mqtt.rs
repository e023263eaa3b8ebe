//! MQTT detection stream fed by an external tracker
//!
//! The tracker publishes one JSON `FrameResult` per frame. A message with
//! `"eos": true` ends the stream. Results are forwarded in arrival order
//! through a bounded channel; the eventloop waits when the channel is full
//! so no frame is ever dropped.

use crate::domain::error::VisionError;
use crate::domain::types::FrameResult;
use crate::infra::config::Config;
use crate::io::detections::{DetectionStream, StreamOpener, TrackingParams};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 256;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Connection settings for the tracker broker
#[derive(Debug, Clone)]
pub struct MqttStreamConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub open_timeout: Duration,
}

impl MqttStreamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mqtt_host().to_string(),
            port: config.mqtt_port(),
            topic: config.mqtt_topic().to_string(),
            open_timeout: Duration::from_millis(config.open_timeout_ms()),
        }
    }

    fn uri(&self) -> String {
        format!("mqtt://{}:{}/{}", self.host, self.port, self.topic)
    }
}

/// Decode one tracker message; malformed payloads become an empty frame
pub fn parse_frame_payload(payload: &[u8]) -> FrameResult {
    match serde_json::from_slice::<FrameResult>(payload) {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, bytes = %payload.len(), "mqtt_frame_malformed");
            FrameResult::default()
        }
    }
}

/// Live detection stream backed by an MQTT subscription
pub struct MqttDetectionStream {
    rx: mpsc::Receiver<Result<FrameResult, VisionError>>,
    task: JoinHandle<()>,
    finished: bool,
}

impl MqttDetectionStream {
    /// Connect, subscribe and wait for the broker's ConnAck
    pub async fn connect(config: &MqttStreamConfig) -> Result<Self, VisionError> {
        let uri = config.uri();
        let mut options = MqttOptions::new("vision-crossing", config.host.as_str(), config.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        client
            .subscribe(config.topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| VisionError::stream_unavailable(&uri, e))?;

        tokio::time::timeout(config.open_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| VisionError::stream_unavailable(&uri, "timed out waiting for broker"))?
            .map_err(|e| VisionError::stream_unavailable(&uri, e))?;

        info!(uri = %uri, "mqtt_stream_connected");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(forward_results(client, eventloop, tx, uri));
        Ok(Self { rx, task, finished: false })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), rumqttc::ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn forward_results(
    client: AsyncClient,
    mut eventloop: EventLoop,
    tx: mpsc::Sender<Result<FrameResult, VisionError>>,
    uri: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let result = parse_frame_payload(&publish.payload);
                let eos = result.eos;
                debug!(frame = %result.frame, boxes = %result.boxes.len(), "mqtt_frame_received");
                if tx.send(Ok(result)).await.is_err() || eos {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(uri = %uri, error = %e, "mqtt_stream_error");
                let _ = tx.send(Err(VisionError::stream_unavailable(&uri, e))).await;
                break;
            }
        }
    }
    let _ = client.try_disconnect();
    debug!(uri = %uri, "mqtt_stream_forwarder_stopped");
}

#[async_trait]
impl DetectionStream for MqttDetectionStream {
    async fn next_result(&mut self) -> Result<Option<FrameResult>, VisionError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(result)) if result.eos => {
                self.finished = true;
                info!(frame = %result.frame, "mqtt_stream_end");
                Ok(None)
            }
            Some(Ok(result)) => Ok(Some(result)),
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

impl Drop for MqttDetectionStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Opens MQTT detection streams
///
/// Frames still come from the video directory and are paired with results
/// by frame number, so QoS1 redeliveries and gaps do not shift the pairing.
pub struct MqttOpener {
    config: MqttStreamConfig,
}

impl MqttOpener {
    pub fn new(config: MqttStreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamOpener for MqttOpener {
    /// The publishing tracker is configured on its own side; `params` are
    /// logged so a mismatched deployment is visible
    async fn open_detections(
        &self,
        video_url: &str,
        params: &TrackingParams,
    ) -> Result<Box<dyn DetectionStream>, VisionError> {
        info!(
            video_url = %video_url,
            topic = %self.config.topic,
            class_id = %params.person_class_id,
            confidence_floor = %params.confidence_floor,
            image_size = %params.image_size,
            "opening_mqtt_stream"
        );
        Ok(Box::new(MqttDetectionStream::connect(&self.config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_payload() {
        let payload = br#"{"frame": 12, "boxes": [{"id": 2, "cls": 0, "conf": 0.9,
            "xyxyn": [0.1, 0.2, 0.3, 0.4], "xyxy": [1, 2, 3, 4]}]}"#;
        let result = parse_frame_payload(payload);
        assert_eq!(result.frame, 12);
        assert_eq!(result.boxes.len(), 1);
        assert!(!result.eos);
    }

    #[test]
    fn test_parse_keeps_good_boxes_next_to_bad_ones() {
        let payload = br#"{"frame": 4, "boxes": [
            {"id": 4.0, "cls": 0, "conf": 0.9, "xyxyn": [0.1, 0.2, 0.3, 0.4], "xyxy": [1, 2, 3, 4]},
            {"id": "oops", "cls": 0, "conf": 0.9, "xyxyn": [0.1, 0.2, 0.3, 0.4], "xyxy": [1, 2, 3, 4]}]}"#;
        let result = parse_frame_payload(payload);
        assert_eq!(result.frame, 4);
        assert_eq!(result.boxes.len(), 2);
        assert!(result.boxes[0].validate().is_ok());
        assert!(result.boxes[1].validate().is_err());
    }

    #[test]
    fn test_parse_eos_marker() {
        let result = parse_frame_payload(br#"{"frame": 99, "eos": true}"#);
        assert!(result.eos);
        assert!(result.boxes.is_empty());
    }

    #[test]
    fn test_parse_malformed_payload() {
        assert_eq!(parse_frame_payload(b"\xff\xfe"), FrameResult::default());
    }

    #[tokio::test]
    async fn test_connect_unreachable_broker_is_stream_unavailable() {
        let config = MqttStreamConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            topic: "vision/detections".to_string(),
            open_timeout: Duration::from_millis(500),
        };
        let err = MqttDetectionStream::connect(&config).await.err().unwrap();
        assert!(err.is_stream_unavailable());
    }
}
