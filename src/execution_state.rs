//! # Lifecycle Execution State
//!
//! The per-index progress record persisted as custom metadata on the index
//! document. It is an immutable value: every "update" builds a new record
//! which the driver then proposes wholesale to the store as part of a
//! candidate cluster state. Nothing in this module writes in place.

use crate::error::{LifecycleError, Result};
use crate::step::StepKey;
use std::collections::HashMap;

/// Key under which the execution state lives in an index's custom metadata.
pub const CUSTOM_METADATA_KEY: &str = "lifecycle";

const PHASE: &str = "phase";
const ACTION: &str = "action";
const STEP: &str = "step";
const FAILED_STEP: &str = "failed_step";
const FAILED_STEP_RETRY_COUNT: &str = "failed_step_retry_count";
const IS_AUTO_RETRYABLE_ERROR: &str = "is_auto_retryable_error";
const STEP_TIME: &str = "step_time";
const PHASE_TIME: &str = "phase_time";
const ACTION_TIME: &str = "action_time";
const SNAPSHOT_NAME: &str = "snapshot_name";
const SNAPSHOT_REPOSITORY: &str = "snapshot_repository";
const SNAPSHOT_INDEX_NAME: &str = "snapshot_index_name";
const STEP_INFO: &str = "step_info";

/// Immutable per-index lifecycle progress record.
///
/// Timestamps are epoch millis; `phase_time`, `action_time` and `step_time`
/// mark entry into the respective level and only change when that level
/// changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleExecutionState {
    pub phase: Option<String>,
    pub action: Option<String>,
    pub step: Option<String>,
    pub failed_step: Option<String>,
    pub failed_step_retry_count: Option<u32>,
    /// Whether the recorded failure may be re-attempted automatically.
    /// Persisted with the failure so the decision holds across driver
    /// restarts; a non-retryable record stays parked until remediated.
    pub is_auto_retryable_error: Option<bool>,
    pub step_time: Option<i64>,
    pub phase_time: Option<i64>,
    pub action_time: Option<i64>,
    pub snapshot_name: Option<String>,
    pub snapshot_repository: Option<String>,
    pub snapshot_index_name: Option<String>,
    pub step_info: Option<String>,
}

impl LifecycleExecutionState {
    /// The step key this index is currently on, if lifecycle management has
    /// started for it.
    pub fn current_step_key(&self) -> Option<StepKey> {
        match (&self.phase, &self.action, &self.step) {
            (Some(phase), Some(action), Some(step)) => {
                Some(StepKey::new(phase.clone(), action.clone(), step.clone()))
            }
            _ => None,
        }
    }

    /// New record positioned on `key`, with entry timestamps refreshed only
    /// at the levels that actually changed. Clears any failure bookkeeping:
    /// successfully leaving a step resets the retry counter.
    pub fn advancing_to(&self, key: &StepKey, now_millis: i64) -> Self {
        let phase_changed = self.phase.as_deref() != Some(key.phase());
        let action_changed = phase_changed || self.action.as_deref() != Some(key.action());

        Self {
            phase: Some(key.phase().to_string()),
            action: Some(key.action().to_string()),
            step: Some(key.name().to_string()),
            failed_step: None,
            failed_step_retry_count: None,
            is_auto_retryable_error: None,
            step_time: Some(now_millis),
            phase_time: if phase_changed {
                Some(now_millis)
            } else {
                self.phase_time
            },
            action_time: if action_changed {
                Some(now_millis)
            } else {
                self.action_time
            },
            step_info: None,
            ..self.clone()
        }
    }

    /// New record marking the current step as failed, carrying diagnostic
    /// text, an incremented retry counter, and whether the failure class
    /// permits automatic re-attempts.
    pub fn with_failure(
        &self,
        step_name: &str,
        info: impl Into<String>,
        auto_retryable: bool,
    ) -> Self {
        let retries = self.failed_step_retry_count.unwrap_or(0) + 1;
        Self {
            failed_step: Some(step_name.to_string()),
            failed_step_retry_count: Some(retries),
            is_auto_retryable_error: Some(auto_retryable),
            step_info: Some(info.into()),
            ..self.clone()
        }
    }

    /// New record carrying the generated snapshot coordinates.
    pub fn with_snapshot(
        &self,
        name: impl Into<String>,
        repository: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            snapshot_name: Some(name.into()),
            snapshot_repository: Some(repository.into()),
            snapshot_index_name: Some(index_name.into()),
            ..self.clone()
        }
    }

    /// Flat string mapping as persisted inside the index metadata. Unset
    /// fields are absent, not empty strings.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        };
        put(PHASE, &self.phase);
        put(ACTION, &self.action);
        put(STEP, &self.step);
        put(FAILED_STEP, &self.failed_step);
        put(SNAPSHOT_NAME, &self.snapshot_name);
        put(SNAPSHOT_REPOSITORY, &self.snapshot_repository);
        put(SNAPSHOT_INDEX_NAME, &self.snapshot_index_name);
        put(STEP_INFO, &self.step_info);
        if let Some(n) = self.failed_step_retry_count {
            map.insert(FAILED_STEP_RETRY_COUNT.to_string(), n.to_string());
        }
        if let Some(b) = self.is_auto_retryable_error {
            map.insert(IS_AUTO_RETRYABLE_ERROR.to_string(), b.to_string());
        }
        if let Some(t) = self.step_time {
            map.insert(STEP_TIME.to_string(), t.to_string());
        }
        if let Some(t) = self.phase_time {
            map.insert(PHASE_TIME.to_string(), t.to_string());
        }
        if let Some(t) = self.action_time {
            map.insert(ACTION_TIME.to_string(), t.to_string());
        }
        map
    }

    /// Decode the record from its persisted flat mapping. Malformed numeric
    /// fields are a typed error rather than a panic so the driver can
    /// quarantine the index instead of crashing the control loop.
    pub fn from_map(index: &str, map: &HashMap<String, String>) -> Result<Self> {
        // Step-key components must be resolvable back into a StepKey; an
        // empty component is a corrupt record, not a fresh one.
        for field in [PHASE, ACTION, STEP] {
            if map.get(field).is_some_and(|v| v.trim().is_empty()) {
                return Err(LifecycleError::State {
                    index: index.to_string(),
                    message: format!("field {field} must not be empty"),
                });
            }
        }
        let get = |key: &str| map.get(key).cloned();
        let parse_millis = |key: &str| -> Result<Option<i64>> {
            map.get(key)
                .map(|raw| {
                    raw.parse::<i64>().map_err(|_| LifecycleError::State {
                        index: index.to_string(),
                        message: format!("field {key} is not a valid timestamp: {raw}"),
                    })
                })
                .transpose()
        };
        let retry_count = map
            .get(FAILED_STEP_RETRY_COUNT)
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| LifecycleError::State {
                    index: index.to_string(),
                    message: format!("field {FAILED_STEP_RETRY_COUNT} is not a valid count: {raw}"),
                })
            })
            .transpose()?;
        let auto_retryable = map
            .get(IS_AUTO_RETRYABLE_ERROR)
            .map(|raw| {
                raw.parse::<bool>().map_err(|_| LifecycleError::State {
                    index: index.to_string(),
                    message: format!("field {IS_AUTO_RETRYABLE_ERROR} is not a valid flag: {raw}"),
                })
            })
            .transpose()?;

        Ok(Self {
            phase: get(PHASE),
            action: get(ACTION),
            step: get(STEP),
            failed_step: get(FAILED_STEP),
            failed_step_retry_count: retry_count,
            is_auto_retryable_error: auto_retryable,
            step_time: parse_millis(STEP_TIME)?,
            phase_time: parse_millis(PHASE_TIME)?,
            action_time: parse_millis(ACTION_TIME)?,
            snapshot_name: get(SNAPSHOT_NAME),
            snapshot_repository: get(SNAPSHOT_REPOSITORY),
            snapshot_index_name: get(SNAPSHOT_INDEX_NAME),
            step_info: get(STEP_INFO),
        })
    }
}
