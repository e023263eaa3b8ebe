//! Services - crossing logic and run management
//!
//! This module contains the stateful services:
//! - `crossing` - Per-run proximity state and crossing decisions
//! - `analysis` - Frame processing loop for one analysis run
//! - `evidence` - Full-frame and composite crop capture
//! - `trigger_line` - Trigger-line calibration image
//! - `orchestrator` - Login, event selection and the idle control loop

pub mod analysis;
pub mod crossing;
pub mod evidence;
pub mod orchestrator;
pub mod trigger_line;

// Re-export commonly used types
pub use analysis::{AnalysisRunner, Collaborators, RunSettings};
pub use crossing::{Action, CrossingTracker, ProximityState};
pub use evidence::{CrossingEvent, EvidenceCapture};
pub use orchestrator::{Orchestrator, PollAction};
pub use trigger_line::TriggerLineRenderer;
