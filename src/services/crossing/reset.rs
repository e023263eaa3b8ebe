//! Reset policies for crossing state
//!
//! Trackers number identities from 1 and start over when re-initialized.
//! Seeing identity 1 after several completed crossings therefore signals a
//! new heat. That inference is tied to the tracker's numbering; deployments
//! that signal new runs explicitly use `ExplicitReset`.

use crate::domain::types::TrackId;

/// Decides whether observed identities imply a new heat
pub trait ResetPolicy: Send {
    fn name(&self) -> &'static str;

    /// Called before every observation with the current completed count
    fn should_reset(&self, track_id: TrackId, completed: usize) -> bool;
}

/// Resets when identity 1 reappears after more than one completed crossing
#[derive(Debug, Clone, Copy, Default)]
pub struct WraparoundReset;

impl ResetPolicy for WraparoundReset {
    fn name(&self) -> &'static str {
        "wraparound"
    }

    fn should_reset(&self, track_id: TrackId, completed: usize) -> bool {
        track_id == TrackId(1) && completed > 1
    }
}

/// Never infers a reset; state lives until the run ends
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitReset;

impl ResetPolicy for ExplicitReset {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn should_reset(&self, _track_id: TrackId, _completed: usize) -> bool {
        false
    }
}
