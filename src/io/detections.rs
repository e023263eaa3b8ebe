//! Tracked-detection streams
//!
//! A `DetectionStream` yields one `FrameResult` per frame in temporal order.
//! Backends:
//! - replay: JSONL file of frame results stored with the frame images
//! - mqtt: live results published by an external tracker (see `io::mqtt`)
//!
//! A `StreamOpener` opens both the detection stream and the matching
//! high-resolution frame source for a video source identifier.

use crate::domain::error::VisionError;
use crate::domain::types::FrameResult;
use crate::io::frames::{FrameSource, ImageSequenceSource};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

/// Parameters the external tracker is expected to run with
///
/// Tracking runs out of process and is configured there. Openers receive
/// these for logging only; class and confidence filtering is applied again
/// by the analysis loop regardless of what the tracker emits.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingParams {
    pub person_class_id: i64,
    pub confidence_floor: f64,
    /// Tracker inference size in pixels (0 lets the tracker decide)
    pub image_size: u32,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self { person_class_id: 0, confidence_floor: 0.6, image_size: 0 }
    }
}

/// Per-frame tracker output in arrival order
#[async_trait]
pub trait DetectionStream: Send {
    /// Next frame result, or None on end of stream
    async fn next_result(&mut self) -> Result<Option<FrameResult>, VisionError>;
}

/// Opens the collaborator streams for one analysis run
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open_detections(
        &self,
        video_url: &str,
        params: &TrackingParams,
    ) -> Result<Box<dyn DetectionStream>, VisionError>;

    fn open_frames(&self, video_url: &str) -> Result<Box<dyn FrameSource>, VisionError> {
        Ok(Box::new(ImageSequenceSource::open(video_url)?))
    }
}

/// Replays frame results from a JSONL file
pub struct ReplayStream {
    uri: String,
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl ReplayStream {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let uri = path.display().to_string();
        let file = File::open(path).await.map_err(|e| VisionError::stream_unavailable(&uri, e))?;

        info!(file = %uri, "replay_stream_opened");
        Ok(Self { uri, lines: BufReader::new(file).lines(), line_no: 0 })
    }
}

#[async_trait]
impl DetectionStream for ReplayStream {
    async fn next_result(&mut self) -> Result<Option<FrameResult>, VisionError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| VisionError::stream_unavailable(&self.uri, e))?;
            let Some(line) = line else {
                return Ok(None);
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            // A corrupt line still accounts for one frame
            return match serde_json::from_str::<FrameResult>(&line) {
                Ok(result) => Ok(Some(result)),
                Err(e) => {
                    warn!(file = %self.uri, line = %self.line_no, error = %e, "frame_result_malformed");
                    Ok(Some(FrameResult::default()))
                }
            };
        }
    }
}

/// Opens `{video_url}/{detections_file}` as a replay stream
pub struct ReplayOpener {
    detections_file: String,
}

impl ReplayOpener {
    pub fn new(detections_file: impl Into<String>) -> Self {
        Self { detections_file: detections_file.into() }
    }

    fn detections_path(&self, video_url: &str) -> PathBuf {
        Path::new(video_url).join(&self.detections_file)
    }
}

#[async_trait]
impl StreamOpener for ReplayOpener {
    async fn open_detections(
        &self,
        video_url: &str,
        params: &TrackingParams,
    ) -> Result<Box<dyn DetectionStream>, VisionError> {
        info!(
            video_url = %video_url,
            class_id = %params.person_class_id,
            confidence_floor = %params.confidence_floor,
            image_size = %params.image_size,
            "opening_replay_stream"
        );
        let stream = ReplayStream::open(self.detections_path(video_url)).await?;
        Ok(Box::new(stream))
    }
}
