//! Per-run crossing state for tracked identities
//!
//! The CrossingTracker decides, for one classified detection, what state
//! transition occurs:
//! - 80% / 90% bands keep the first crop seen per track (first-seen wins)
//! - the crossed band credits a track at most once per run
//! - a reset policy clears everything when the tracker's identity counter restarts
//!
//! Crops are generic so the state machine can be exercised without images.

mod reset;

pub use reset::{ExplicitReset, ResetPolicy, WraparoundReset};

use crate::domain::types::{Band, TrackId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Transition requested by an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to record
    Ignore,
    /// Caller should crop the detection and store it in the 80% bucket
    StoreNear80,
    /// Caller should crop the detection and store it in the 90% bucket
    StoreNear90,
    /// Track crossed for the first time this run; caller builds evidence
    EmitEvent,
}

/// Mutable bookkeeping for one run
#[derive(Debug)]
pub struct ProximityState<C> {
    pub(crate) near_80: HashMap<TrackId, C>,
    pub(crate) near_90: HashMap<TrackId, C>,
    pub(crate) completed: HashSet<TrackId>,
}

impl<C> ProximityState<C> {
    pub fn new() -> Self {
        Self { near_80: HashMap::new(), near_90: HashMap::new(), completed: HashSet::new() }
    }

    pub fn clear(&mut self) {
        self.near_80.clear();
        self.near_90.clear();
        self.completed.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.near_80.is_empty() && self.near_90.is_empty() && self.completed.is_empty()
    }
}

impl<C> Default for ProximityState<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Crossing state machine for one run
pub struct CrossingTracker<C> {
    state: ProximityState<C>,
    reset_policy: Box<dyn ResetPolicy>,
}

impl<C> CrossingTracker<C> {
    /// Tracker with the identity-wraparound reset heuristic
    pub fn new() -> Self {
        Self::with_reset_policy(Box::new(WraparoundReset))
    }

    pub fn with_reset_policy(reset_policy: Box<dyn ResetPolicy>) -> Self {
        debug!(policy = %reset_policy.name(), "crossing_tracker_created");
        Self { state: ProximityState::new(), reset_policy }
    }

    /// Clear all state if the reset policy says a new heat began
    ///
    /// Must be called before each detection is observed.
    /// Returns true if state was cleared.
    pub fn maybe_reset(&mut self, track_id: TrackId) -> bool {
        if !self.reset_policy.should_reset(track_id, self.state.completed.len()) {
            return false;
        }

        info!(
            track_id = %track_id,
            completed = %self.state.completed.len(),
            near_80 = %self.state.near_80.len(),
            near_90 = %self.state.near_90.len(),
            policy = %self.reset_policy.name(),
            "crossing_state_reset"
        );
        self.state.clear();
        true
    }

    /// Decide the transition for a classified detection
    pub fn observe(&mut self, track_id: TrackId, band: Band) -> Action {
        match band {
            Band::Far => Action::Ignore,
            // Crops for tracks that already crossed are never consumed this run
            _ if self.state.completed.contains(&track_id) => Action::Ignore,
            Band::Near80 if self.state.near_80.contains_key(&track_id) => Action::Ignore,
            Band::Near80 => Action::StoreNear80,
            Band::Near90 if self.state.near_90.contains_key(&track_id) => Action::Ignore,
            Band::Near90 => Action::StoreNear90,
            Band::Crossed => {
                self.state.completed.insert(track_id);
                debug!(track_id = %track_id, completed = %self.state.completed.len(), "track_crossed");
                Action::EmitEvent
            }
        }
    }

    /// Store a partial crop for a sub-threshold band
    ///
    /// An existing crop is never overwritten. Returns true if stored.
    pub fn store_crop(&mut self, track_id: TrackId, band: Band, crop: C) -> bool {
        let bucket = match band {
            Band::Near80 => &mut self.state.near_80,
            Band::Near90 => &mut self.state.near_90,
            Band::Far | Band::Crossed => return false,
        };

        if bucket.contains_key(&track_id) {
            return false;
        }
        bucket.insert(track_id, crop);
        debug!(track_id = %track_id, band = %band.as_str(), "partial_crop_stored");
        true
    }

    /// Remove and return the stored crops for a track, 80% before 90%
    pub fn take_crops(&mut self, track_id: TrackId) -> Vec<C> {
        let mut crops = Vec::with_capacity(3);
        if let Some(crop) = self.state.near_80.remove(&track_id) {
            crops.push(crop);
        }
        if let Some(crop) = self.state.near_90.remove(&track_id) {
            crops.push(crop);
        }
        crops
    }

    pub fn is_completed(&self, track_id: TrackId) -> bool {
        self.state.completed.contains(&track_id)
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed.len()
    }

    pub fn near_80(&self, track_id: TrackId) -> Option<&C> {
        self.state.near_80.get(&track_id)
    }

    pub fn near_90(&self, track_id: TrackId) -> Option<&C> {
        self.state.near_90.get(&track_id)
    }

    pub fn state(&self) -> &ProximityState<C> {
        &self.state
    }
}

impl<C> Default for CrossingTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}
