//! Domain models - core types and pure crossing geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - tracker detections, trigger line, proximity bands, race event
//! - `geometry` - box validation and line-position classification
//! - `error` - error taxonomy for analysis runs

pub mod error;
pub mod geometry;
pub mod types;

// Re-export commonly used types at module level
pub use error::VisionError;
pub use geometry::{classify_line_position, validate_box, BoxLimits};
pub use types::{Band, DetectionBox, FrameResult, RaceEvent, RunOutcome, TrackId, TriggerLine};
