//! Analysis run: the per-frame processing loop
//!
//! One run consumes a detection stream in arrival order and, per frame:
//! - pairs the result with the high-resolution frame of the same number,
//!   dropping results that repeat or precede one already processed
//! - renders the trigger-line calibration image on the first result
//! - validates, filters, classifies and box-checks every detection
//! - feeds the crossing tracker and captures evidence on first crossing
//! - checks the stop flag once the frame is done
//!
//! Run parameters are read from the config store once at run start. Bad
//! detections are skipped; only configuration and stream failures end a run
//! with an error.


use crate::domain::error::VisionError;
use crate::domain::geometry::{classify_line_position, validate_box, BoxLimits};
use crate::domain::types::{Band, RawDetection, RunOutcome, TriggerLine};
use crate::infra::config::{Config, IdentityReset};
use crate::infra::metrics::Metrics;
use crate::io::config_store::{keys, ConfigStore};
use crate::io::detections::{DetectionStream, StreamOpener, TrackingParams};
use crate::io::file_sink::FileSink;
use crate::io::frames::FrameSource;
use crate::io::status::StatusSink;
use crate::services::crossing::{Action, CrossingTracker, ExplicitReset, ResetPolicy, WraparoundReset};
use crate::services::evidence::{crop_region, EvidenceCapture};
use crate::services::trigger_line::{TriggerLineRenderer, DEFAULT_FILE_NAME};
use ab_glyph::FontVec;
use chrono::Local;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Tracker inference size when the event does not configure one
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

/// Capabilities a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub config_store: Arc<dyn ConfigStore>,
    pub status: Arc<dyn StatusSink>,
    pub file_sink: Arc<dyn FileSink>,
    pub streams: Arc<dyn StreamOpener>,
}

/// Run parameters, fetched once per run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub camera_location: String,
    pub video_url: String,
    pub trigger_line: TriggerLine,
    pub box_limits: BoxLimits,
    pub show_video: bool,
    pub image_size: u32,
    pub trigger_line_file: String,
}

impl RunSettings {
    pub async fn fetch(store: &dyn ConfigStore, event_id: &str) -> Result<Self, VisionError> {
        let camera_location = required(store, event_id, keys::CAMERA_LOCATION).await?;
        let video_url = required(store, event_id, keys::VIDEO_URL).await?;
        let trigger_line: TriggerLine =
            required(store, event_id, keys::TRIGGER_LINE_XYXYN).await?.parse()?;

        let defaults = BoxLimits::default();
        let box_limits = BoxLimits {
            min_size: optional(store, event_id, keys::DETECTION_BOX_MINIMUM_SIZE)
                .await?
                .unwrap_or(defaults.min_size),
            max_size: optional(store, event_id, keys::DETECTION_BOX_MAXIMUM_SIZE)
                .await?
                .unwrap_or(defaults.max_size),
        };

        let show_video = store.get_bool(event_id, keys::SHOW_VIDEO).await?;
        let image_size = optional(store, event_id, keys::VIDEO_ANALYTICS_IMAGE_SIZE)
            .await?
            .unwrap_or(DEFAULT_IMAGE_SIZE);
        let trigger_line_file = store
            .get(event_id, keys::TRIGGER_LINE_CONFIG_FILE)
            .await?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        Ok(Self {
            camera_location,
            video_url,
            trigger_line,
            box_limits,
            show_video,
            image_size,
            trigger_line_file,
        })
    }
}

async fn required(store: &dyn ConfigStore, event_id: &str, key: &str) -> Result<String, VisionError> {
    store
        .get(event_id, key)
        .await?
        .ok_or_else(|| VisionError::Configuration(format!("{key} is not set for event {event_id}")))
}

async fn optional<T: std::str::FromStr>(
    store: &dyn ConfigStore,
    event_id: &str,
    key: &str,
) -> Result<Option<T>, VisionError>
where
    T::Err: std::fmt::Display,
{
    match store.get(event_id, key).await? {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| VisionError::Configuration(format!("{key} has invalid value {value:?}: {e}"))),
    }
}

/// Drives analysis runs for one event
pub struct AnalysisRunner {
    collab: Collaborators,
    metrics: Arc<Metrics>,
    renderer: TriggerLineRenderer,
    photos_dir: PathBuf,
    person_class_id: i64,
    confidence_floor: f64,
    identity_reset: IdentityReset,
    event_id: String,
    status_type: String,
}

impl AnalysisRunner {
    pub fn new(
        collab: Collaborators,
        metrics: Arc<Metrics>,
        config: &Config,
        font: Option<FontVec>,
        event_id: &str,
        status_type: &str,
    ) -> Self {
        let renderer = TriggerLineRenderer::new(collab.file_sink.clone(), config.photos_dir(), font);
        Self {
            collab,
            metrics,
            renderer,
            photos_dir: config.photos_dir().to_path_buf(),
            person_class_id: config.person_class_id(),
            confidence_floor: config.confidence_floor(),
            identity_reset: config.identity_reset(),
            event_id: event_id.to_string(),
            status_type: status_type.to_string(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn config_store(&self) -> &dyn ConfigStore {
        self.collab.config_store.as_ref()
    }

    /// Post an operator status line; failures are logged only
    pub async fn report(&self, message: &str) {
        info!(message = %message, "status");
        if let Err(e) = self.collab.status.create_status(&self.event_id, &self.status_type, message).await {
            warn!(error = %e, "status_report_failed");
        }
    }

    async fn set_flag(&self, key: &str, value: bool) {
        if let Err(e) = self.collab.config_store.set_bool(&self.event_id, key, value).await {
            warn!(key = %key, error = %e, "config_flag_update_failed");
        }
    }

    /// Run one analysis to completion or until the stop flag is seen
    ///
    /// `VIDEO_ANALYTICS_RUNNING` is true while frames are processed and reset
    /// on every exit path.
    pub async fn run(&self) -> Result<RunOutcome, VisionError> {
        self.metrics.record_run_started();
        let result = self.run_inner().await;
        self.set_flag(keys::VIDEO_ANALYTICS_RUNNING, false).await;

        match &result {
            Ok(RunOutcome::Completed) => {
                self.metrics.record_run_completed();
                info!(event_id = %self.event_id, outcome = %RunOutcome::Completed.as_str(), "analysis_run_finished");
                self.report("Video analysis complete.").await;
            }
            Ok(RunOutcome::Stopped) => {
                self.metrics.record_run_stopped();
                self.set_flag(keys::VIDEO_ANALYTICS_STOP, false).await;
                info!(event_id = %self.event_id, outcome = %RunOutcome::Stopped.as_str(), "analysis_run_finished");
                self.report("Video analytics stopped.").await;
            }
            Err(e) => {
                self.metrics.record_run_failed();
                error!(event_id = %self.event_id, error = %e, "analysis_run_failed");
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<RunOutcome, VisionError> {
        let settings = RunSettings::fetch(self.collab.config_store.as_ref(), &self.event_id).await?;
        info!(
            event_id = %self.event_id,
            camera_location = %settings.camera_location,
            video_url = %settings.video_url,
            trigger_line = %settings.trigger_line,
            min_size = %settings.box_limits.min_size,
            max_size = %settings.box_limits.max_size,
            show_video = %settings.show_video,
            image_size = %settings.image_size,
            "analysis_run_starting"
        );
        self.report(&format!("Starting video analysis of {}.", settings.video_url)).await;

        let params = TrackingParams {
            person_class_id: self.person_class_id,
            confidence_floor: self.confidence_floor,
            image_size: settings.image_size,
        };
        let detections = self.collab.streams.open_detections(&settings.video_url, &params).await?;
        let frames = self.collab.streams.open_frames(&settings.video_url)?;
        self.set_flag(keys::VIDEO_ANALYTICS_RUNNING, true).await;

        self.process_stream(&settings, detections, frames).await
    }

    async fn process_stream(
        &self,
        settings: &RunSettings,
        mut detections: Box<dyn DetectionStream>,
        mut frames: Box<dyn FrameSource>,
    ) -> Result<RunOutcome, VisionError> {
        let reset_policy: Box<dyn ResetPolicy> = match self.identity_reset {
            IdentityReset::Wraparound => Box::new(WraparoundReset),
            IdentityReset::Explicit => Box::new(ExplicitReset),
        };
        let mut tracker: CrossingTracker<RgbImage> = CrossingTracker::with_reset_policy(reset_policy);
        let evidence =
            EvidenceCapture::new(self.collab.file_sink.clone(), &self.photos_dir, &settings.camera_location);
        let mut first_result = true;
        // Number of the next frame the source will yield
        let mut next_frame_no: u64 = 1;

        while let Some(result) = detections.next_result().await? {
            let started = Instant::now();
            if result.frame != 0 && result.frame < next_frame_no {
                warn!(frame = %result.frame, expected = %next_frame_no, "stale_frame_result_dropped");
                self.metrics.record_stale_result();
                continue;
            }
            let target = if result.frame == 0 { next_frame_no } else { result.frame };
            if target > next_frame_no {
                warn!(frame = %target, missing = %(target - next_frame_no), "frame_results_missing");
            }

            let (source, frame) = read_frame(frames, target - next_frame_no, &settings.video_url).await?;
            frames = source;
            let Some(frame) = frame else {
                info!(frame = %target, "frame_source_exhausted");
                break;
            };
            next_frame_no = target + 1;

            if first_result {
                first_result = false;
                self.draw_trigger_line(&frame, settings);
            }

            if frame.width() == 0 || frame.height() == 0 {
                warn!(frame = %target, detections = %result.boxes.len(), "frame_empty_detections_skipped");
            } else {
                let frame = Arc::new(frame);
                for raw in &result.boxes {
                    self.process_detection(&mut tracker, &evidence, &frame, raw, settings).await;
                }
            }

            self.metrics
                .record_frame_processed(started.elapsed().as_micros() as u64, result.boxes.len() as u64);

            if self.stop_requested().await {
                info!(frame = %target, "stop_flag_observed");
                return Ok(RunOutcome::Stopped);
            }
        }

        info!(crossings = %tracker.completed_count(), "detection_stream_exhausted");
        Ok(RunOutcome::Completed)
    }

    async fn stop_requested(&self) -> bool {
        match self.collab.config_store.get_bool(&self.event_id, keys::VIDEO_ANALYTICS_STOP).await {
            Ok(stop) => stop,
            Err(e) => {
                warn!(error = %e, "stop_flag_read_failed");
                false
            }
        }
    }

    async fn process_detection(
        &self,
        tracker: &mut CrossingTracker<RgbImage>,
        evidence: &EvidenceCapture,
        frame: &Arc<RgbImage>,
        raw: &RawDetection,
        settings: &RunSettings,
    ) {
        let detection = match raw.validate() {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "detection_skipped");
                self.metrics.record_detection_skipped();
                return;
            }
        };
        let track_id = detection.track_id;

        if tracker.maybe_reset(track_id) {
            self.metrics.record_state_reset();
        }

        if detection.class_id != self.person_class_id || detection.confidence < self.confidence_floor {
            return;
        }

        let band = classify_line_position(&detection.xyxyn, &settings.trigger_line);
        if band == Band::Far {
            return;
        }
        if !validate_box(&detection.xyxyn, settings.box_limits) {
            debug!(track_id = %track_id, band = %band.as_str(), "detection_box_rejected");
            self.metrics.record_box_rejected();
            return;
        }

        match tracker.observe(track_id, band) {
            Action::Ignore => {}
            Action::StoreNear80 | Action::StoreNear90 => {
                if tracker.store_crop(track_id, band, crop_region(frame, &detection.xyxyn)) {
                    self.metrics.record_partial_crop();
                }
            }
            Action::EmitEvent => {
                let crops = tracker.take_crops(track_id);
                let timestamp = Local::now().naive_local();
                let capture = evidence.clone();
                let frame = Arc::clone(frame);
                let xyxyn = detection.xyxyn;
                let captured = tokio::task::spawn_blocking(move || {
                    capture.capture(track_id, &frame, &xyxyn, crops, timestamp)
                })
                .await;

                self.metrics.record_crossing();
                match captured {
                    Ok((event, errors)) => {
                        for _ in &errors {
                            self.metrics.record_evidence_write_failure();
                        }
                        info!(
                            track_id = %track_id,
                            camera_location = %event.camera_location,
                            file = %event.full_frame_path.display(),
                            write_failures = %errors.len(),
                            "line_crossing"
                        );
                    }
                    Err(e) => {
                        self.metrics.record_evidence_write_failure();
                        error!(track_id = %track_id, error = %e, "evidence_task_failed");
                    }
                }
                self.report(&format!("Line crossing! ID:{track_id}")).await;
            }
        }
    }

    fn draw_trigger_line(&self, frame: &RgbImage, settings: &RunSettings) {
        let now = Local::now().naive_local();
        if let Err(e) = self.renderer.render(frame, &settings.trigger_line, &settings.trigger_line_file, now) {
            warn!(error = %e, "trigger_line_draw_failed");
        }
    }

    /// Draw the calibration image from the first frame of the configured video
    pub async fn draw_trigger_line_on_demand(&self) -> Result<Option<PathBuf>, VisionError> {
        let settings = RunSettings::fetch(self.collab.config_store.as_ref(), &self.event_id).await?;
        let mut frames = self.collab.streams.open_frames(&settings.video_url)?;
        let Some(frame) = frames.next_frame()? else {
            warn!(video_url = %settings.video_url, "trigger_line_no_frame");
            return Ok(None);
        };
        let now = Local::now().naive_local();
        self.renderer.render(&frame, &settings.trigger_line, &settings.trigger_line_file, now)
    }
}

type FrameRead = (Box<dyn FrameSource>, Option<RgbImage>);

/// Skip `skip` frames, then decode the next one on the blocking pool
async fn read_frame(
    mut frames: Box<dyn FrameSource>,
    skip: u64,
    video_url: &str,
) -> Result<FrameRead, VisionError> {
    let read = tokio::task::spawn_blocking(move || -> Result<FrameRead, VisionError> {
        for _ in 0..skip {
            if !frames.skip_frame()? {
                return Ok((frames, None));
            }
        }
        let frame = frames.next_frame()?;
        Ok((frames, frame))
    });
    read.await.map_err(|e| VisionError::stream_unavailable(video_url, e))?
}
