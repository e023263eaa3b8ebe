//! Error taxonomy for analysis runs
//!
//! Configuration and stream failures are fatal to a run and propagate to the
//! orchestrator. Detection shape errors are recoverable and never leave the
//! frame loop. Evidence write failures are logged; the crossing stays recorded.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    /// Run parameters are missing or malformed (e.g. trigger line)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Video source could not be opened or read
    #[error("error opening video stream {source_uri}: {reason}")]
    StreamUnavailable { source_uri: String, reason: String },

    /// A single detection lacks expected fields
    #[error("malformed detection: {0}")]
    DetectionShape(String),

    /// File sink failed to persist an image
    #[error("failed to write evidence {}: {reason}", path.display())]
    EvidenceWrite { path: PathBuf, reason: String },

    /// Config store or status service call failed
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl VisionError {
    pub fn stream_unavailable(source_uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::StreamUnavailable { source_uri: source_uri.into(), reason: reason.to_string() }
    }

    pub fn evidence_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::EvidenceWrite { path: path.into(), reason: reason.to_string() }
    }

    /// True for errors the orchestrator may retry after a delay
    pub fn is_stream_unavailable(&self) -> bool {
        matches!(self, Self::StreamUnavailable { .. })
    }
}

impl From<anyhow::Error> for VisionError {
    fn from(e: anyhow::Error) -> Self {
        Self::Collaborator(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_unavailable_message() {
        let e = VisionError::stream_unavailable("rtsp://cam/1", "connection refused");
        assert!(e.is_stream_unavailable());
        assert_eq!(e.to_string(), "error opening video stream rtsp://cam/1: connection refused");
    }

    #[test]
    fn test_collaborator_from_anyhow() {
        let e: VisionError = anyhow::anyhow!("status 500").context("get_config").into();
        assert!(!e.is_stream_unavailable());
        assert!(e.to_string().contains("get_config"));
        assert!(e.to_string().contains("status 500"));
    }
}
