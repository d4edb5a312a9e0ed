//! Terminal marker for a completed phase.

use super::{StepKey, WaitResult, WaitStep};
use crate::cluster_state::ClusterState;
use crate::error::Result;

pub const NAME: &str = "complete";

/// Step an index rests on once every step of a phase has finished. Its
/// condition is always met and it declares no successor, so the driver
/// leaves the index parked here until a policy change moves it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCompleteStep {
    key: StepKey,
}

impl PhaseCompleteStep {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            key: StepKey::new(phase, NAME, NAME),
        }
    }

    pub fn key(&self) -> &StepKey {
        &self.key
    }
}

impl WaitStep for PhaseCompleteStep {
    fn is_condition_met(&self, _index: &str, _state: &ClusterState) -> Result<WaitResult> {
        Ok(WaitResult::met())
    }
}
