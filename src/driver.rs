//! # Step Driver
//!
//! The control loop that moves every managed index through its policy's
//! compiled step chain. One cooperative pass (`tick`) visits each index in
//! turn, so step execution for a single index is strictly sequential while
//! different indices progress independently; no worker is ever dedicated to
//! one index.
//!
//! The driver never mutates cluster state directly. Each pass computes a
//! candidate document from the current step's result and proposes it against
//! the version it read. A rejected proposal is discarded and the whole step
//! is recomputed from a fresh read, which is why step side effects must be
//! safe to recompute from scratch.
//!
//! All retry, backoff, and escalation decisions live here. Steps return
//! typed errors and nothing else; the driver decides between silent retry
//! (version conflicts), counted retry with backoff (transient failures),
//! escalation to the persisted failed state (validation errors, timeouts),
//! and quarantine (invariant violations).

use crate::cluster_state::{ClusterState, ClusterStateStore, Commit, IndexMetadata, Version};
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::execution_state::LifecycleExecutionState;
use crate::operations::{OperationHandle, OperationInvoker, OperationStatus};
use crate::registry::StepRegistry;
use crate::step::{Step, StepBehavior, StepContext, StepKey};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What one scheduling pass did for one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The index was newly placed on its policy's first step.
    Initialized { step: StepKey },
    /// A step completed and the index moved to its successor.
    Advanced { from: StepKey, to: StepKey },
    /// A wait condition is not met yet.
    Waiting,
    /// An external operation is outstanding.
    AsyncPending,
    /// The index finished a terminal step and rests there.
    Completed,
    /// The step failed and the failure was recorded in the execution state.
    Failed { step: StepKey, retryable: bool },
    /// The index is parked in a failed state awaiting backoff expiry or
    /// manual intervention.
    Idle,
    /// The index disappeared or its policy was detached; its task was
    /// dropped without error.
    Abandoned,
    /// Commit attempts for this pass were exhausted by version conflicts;
    /// the next pass starts over from a fresh read.
    Contended,
}

/// In-memory bookkeeping for one index's logical task. Never persisted;
/// reconstructed naturally after a driver restart.
#[derive(Debug, Default)]
struct IndexTask {
    pending_operation: Option<OperationHandle>,
    wait_since: Option<Instant>,
    next_retry_at: Option<Instant>,
}

/// The step execution engine.
pub struct StepDriver {
    store: Arc<dyn ClusterStateStore>,
    registry: Arc<StepRegistry>,
    invoker: Arc<dyn OperationInvoker>,
    config: LifecycleConfig,
    tasks: DashMap<String, IndexTask>,
}

impl StepDriver {
    pub fn new(
        store: Arc<dyn ClusterStateStore>,
        registry: Arc<StepRegistry>,
        invoker: Arc<dyn OperationInvoker>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            invoker,
            config,
            tasks: DashMap::new(),
        }
    }

    /// Run the driver until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "step driver started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("step driver shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One cooperative pass over all managed indices.
    pub async fn tick(&self) -> Vec<(String, StepOutcome)> {
        let (state, _) = self.store.read();
        let managed = state.managed_indices();

        // Drop tasks for indices that are gone or no longer managed.
        self.tasks
            .retain(|index, _| managed.iter().any(|(name, _)| name == index));

        let mut outcomes = Vec::with_capacity(managed.len());
        for (index, _policy) in managed {
            let outcome = match self.run_index_once(&index).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Malformed records and unknown steps quarantine the
                    // index for this pass instead of crashing the loop.
                    error!(index = %index, error = %err, "lifecycle execution quarantined");
                    StepOutcome::Idle
                }
            };
            outcomes.push((index, outcome));
        }
        outcomes
    }

    /// Execute at most one step transition for `index`, retrying silently on
    /// version conflicts up to the configured attempt budget.
    pub async fn run_index_once(&self, index: &str) -> Result<StepOutcome> {
        for attempt in 0..self.config.commit_retry_attempts {
            if attempt > 0 {
                debug!(index, attempt, "recomputing step after version conflict");
            }
            match self.attempt(index).await? {
                AttemptResult::Done(outcome) => return Ok(outcome),
                AttemptResult::Conflict => continue,
            }
        }
        Ok(StepOutcome::Contended)
    }

    async fn attempt(&self, index: &str) -> Result<AttemptResult> {
        let (state, version) = self.store.read();

        let Some(metadata) = state.index(index).map(Arc::clone) else {
            self.tasks.remove(index);
            debug!(index, "index no longer exists, abandoning lifecycle task");
            return Ok(AttemptResult::Done(StepOutcome::Abandoned));
        };
        let Some(policy) = metadata.policy().map(str::to_string) else {
            self.tasks.remove(index);
            debug!(index, "policy detached, abandoning lifecycle task");
            return Ok(AttemptResult::Done(StepOutcome::Abandoned));
        };

        let exec = metadata.lifecycle_execution_state()?;

        let Some(current_key) = exec.current_step_key() else {
            return self.initialize(index, &policy, &state, version, &metadata, &exec);
        };

        let step = self.registry.step(&policy, &current_key)?;

        if exec.failed_step.is_some() && !self.should_reattempt(index, &exec, &step) {
            return Ok(AttemptResult::Done(StepOutcome::Idle));
        }

        match step.behavior() {
            StepBehavior::Action(action) => {
                let ctx = StepContext::at_now();
                match action.perform(index, &state, &ctx) {
                    Ok(new_state) => self.commit_progress(index, &step, new_state, version),
                    Err(err) => self.record_failure(index, &state, version, &metadata, &exec, &step, err),
                }
            }
            StepBehavior::Wait(wait) => match wait.is_condition_met(index, &state) {
                Ok(result) if result.met => {
                    self.advance(index, &state, version, &metadata, &exec, &step)
                }
                Ok(result) => {
                    if let Some(message) = &result.message {
                        debug!(index, step = %current_key, message, "wait condition not met");
                    }
                    self.note_waiting(index, &state, version, &metadata, &exec, &step)
                }
                Err(err) => self.record_failure(index, &state, version, &metadata, &exec, &step, err),
            },
            StepBehavior::AsyncAction(action) => {
                let already_started = self
                    .tasks
                    .get(index)
                    .is_some_and(|task| task.pending_operation.is_some());
                if !already_started {
                    let params = match action.operation(index, &state) {
                        Ok(params) => params,
                        Err(err) => {
                            return self
                                .record_failure(index, &state, version, &metadata, &exec, &step, err)
                        }
                    };
                    let operation = params.operation.clone();
                    match self.invoker.start(params).await {
                        Ok(handle) => {
                            info!(index, step = %current_key, operation, "external operation started");
                            let mut task = self.tasks.entry(index.to_string()).or_default();
                            task.pending_operation = Some(handle);
                        }
                        Err(err) => {
                            return self
                                .record_failure(index, &state, version, &metadata, &exec, &step, err)
                        }
                    }
                }
                // The operation's outcome is awaited by the successor; this
                // step's work is the initiation alone.
                self.advance(index, &state, version, &metadata, &exec, &step)
            }
            StepBehavior::AsyncWait(wait) => {
                let handle = self
                    .tasks
                    .get(index)
                    .and_then(|task| task.pending_operation.clone());
                let status = match &handle {
                    Some(handle) => match self.invoker.poll(handle).await {
                        Ok(status) => status,
                        Err(err) => {
                            return self
                                .record_failure(index, &state, version, &metadata, &exec, &step, err)
                        }
                    },
                    None => {
                        // No handle survives a driver restart; keep polling
                        // as pending so the wait timeout still bounds us.
                        warn!(index, step = %current_key, "no outstanding operation handle, treating as pending");
                        OperationStatus::Pending
                    }
                };
                // The handle is released only once the met condition has
                // actually been committed; conflicts and failures keep it so
                // later passes can re-poll the same operation (polling is
                // idempotent, re-initiation is not).
                match wait.on_status(index, &status) {
                    Ok(result) if result.met => {
                        let committed =
                            self.advance(index, &state, version, &metadata, &exec, &step)?;
                        if matches!(committed, AttemptResult::Done(_)) {
                            self.release_operation(index);
                        }
                        Ok(committed)
                    }
                    Ok(_) => self.note_waiting(index, &state, version, &metadata, &exec, &step),
                    Err(err) => {
                        self.record_failure(index, &state, version, &metadata, &exec, &step, err)
                    }
                }
            }
        }
    }

    fn initialize(
        &self,
        index: &str,
        policy: &str,
        state: &ClusterState,
        version: Version,
        metadata: &IndexMetadata,
        exec: &LifecycleExecutionState,
    ) -> Result<AttemptResult> {
        let first = self.registry.first_step(policy).ok_or_else(|| {
            LifecycleError::UnknownStep {
                policy: policy.to_string(),
                key: "<entry>".to_string(),
            }
        })?;
        let advanced = exec.advancing_to(first.key(), Utc::now().timestamp_millis());
        let candidate = state.with_index(metadata.with_execution_state(&advanced));
        match self.store.propose_update(version, candidate) {
            Commit::Committed(_) => {
                info!(index, policy, step = %first.key(), "index placed under lifecycle management");
                Ok(AttemptResult::Done(StepOutcome::Initialized {
                    step: first.key().clone(),
                }))
            }
            Commit::Conflict { .. } => Ok(AttemptResult::Conflict),
        }
    }

    /// Whether a previously failed step is due for another attempt. The
    /// failure class is read from the persisted record, not driver memory,
    /// so a non-retryable failure stays parked across restarts.
    fn should_reattempt(
        &self,
        index: &str,
        exec: &LifecycleExecutionState,
        step: &Step,
    ) -> bool {
        if !step.is_retryable() {
            return false;
        }
        if !exec.is_auto_retryable_error.unwrap_or(false) {
            return false;
        }
        let retries = exec.failed_step_retry_count.unwrap_or(0);
        if retries > self.config.max_step_retries {
            return false;
        }
        let due = self
            .tasks
            .get(index)
            .and_then(|task| task.next_retry_at)
            .map_or(true, |at| Instant::now() >= at);
        if due {
            debug!(index, retries, "re-attempting failed step");
        }
        due
    }

    /// Commit the result of a successful synchronous action, advancing to
    /// the declared successor (or resting on a terminal step).
    fn commit_progress(
        &self,
        index: &str,
        step: &Step,
        new_state: ClusterState,
        version: Version,
    ) -> Result<AttemptResult> {
        let Some(metadata) = new_state.index(index).map(Arc::clone) else {
            // The step observed a concurrent deletion and no-opped.
            self.tasks.remove(index);
            return Ok(AttemptResult::Done(StepOutcome::Abandoned));
        };
        let exec = metadata.lifecycle_execution_state()?;
        self.advance(index, &new_state, version, &metadata, &exec, step)
    }

    fn advance(
        &self,
        index: &str,
        base_state: &ClusterState,
        version: Version,
        metadata: &IndexMetadata,
        exec: &LifecycleExecutionState,
        step: &Step,
    ) -> Result<AttemptResult> {
        let from = step.key().clone();
        let Some(next) = step.next_key() else {
            // Terminal step: persist the step's own result (if any) and rest.
            let candidate = if exec.failed_step.is_some() {
                // Leaving the failed state on a terminal step still clears
                // the failure bookkeeping.
                let cleared = exec.advancing_to(&from, Utc::now().timestamp_millis());
                base_state.with_index(metadata.with_execution_state(&cleared))
            } else {
                base_state.clone()
            };
            return match self.store.propose_update(version, candidate) {
                Commit::Committed(_) => {
                    self.clear_task(index);
                    debug!(index, step = %from, "terminal lifecycle step complete");
                    Ok(AttemptResult::Done(StepOutcome::Completed))
                }
                Commit::Conflict { .. } => Ok(AttemptResult::Conflict),
            };
        };

        let advanced = exec.advancing_to(next, Utc::now().timestamp_millis());
        let candidate = base_state.with_index(metadata.with_execution_state(&advanced));
        match self.store.propose_update(version, candidate) {
            Commit::Committed(_) => {
                self.clear_task(index);
                info!(index, from = %from, to = %next, "lifecycle step advanced");
                Ok(AttemptResult::Done(StepOutcome::Advanced {
                    from,
                    to: next.clone(),
                }))
            }
            Commit::Conflict { .. } => Ok(AttemptResult::Conflict),
        }
    }

    /// Track an unmet wait condition and enforce the configured maximum
    /// wait. Entry time is in-memory only; a driver restart restarts the
    /// clock, which errs on the side of waiting longer, never shorter.
    fn note_waiting(
        &self,
        index: &str,
        state: &ClusterState,
        version: Version,
        metadata: &IndexMetadata,
        exec: &LifecycleExecutionState,
        step: &Step,
    ) -> Result<AttemptResult> {
        let waited = {
            let mut task = self.tasks.entry(index.to_string()).or_default();
            task.wait_since.get_or_insert_with(Instant::now).elapsed()
        };
        if waited >= self.config.max_wait() {
            let err = LifecycleError::WaitTimeout {
                index: index.to_string(),
                step: step.key().name().to_string(),
                waited_secs: waited.as_secs(),
            };
            return self.record_failure(index, state, version, metadata, exec, step, err);
        }
        let outcome = match step.kind() {
            crate::step::StepKind::Wait => StepOutcome::Waiting,
            _ => StepOutcome::AsyncPending,
        };
        Ok(AttemptResult::Done(outcome))
    }

    /// Persist a failure into the execution state and schedule the next
    /// automatic attempt if the step and error both allow one.
    fn record_failure(
        &self,
        index: &str,
        state: &ClusterState,
        version: Version,
        metadata: &IndexMetadata,
        exec: &LifecycleExecutionState,
        step: &Step,
        err: LifecycleError,
    ) -> Result<AttemptResult> {
        let retryable = step.is_retryable() && err.is_retryable();
        if matches!(err, LifecycleError::InvariantViolation(_)) {
            error!(index, step = %step.key(), error = %err, "internal inconsistency, quarantining index");
        } else {
            warn!(index, step = %step.key(), retryable, error = %err, "lifecycle step failed");
        }

        let failed = exec.with_failure(step.key().name(), err.to_string(), retryable);
        let retries = failed.failed_step_retry_count.unwrap_or(1);
        let candidate = state.with_index(metadata.with_execution_state(&failed));
        match self.store.propose_update(version, candidate) {
            Commit::Committed(_) => {
                let mut task = self.tasks.entry(index.to_string()).or_default();
                task.wait_since = None;
                task.next_retry_at = retryable
                    .then(|| Instant::now() + self.config.retry_backoff(retries));
                Ok(AttemptResult::Done(StepOutcome::Failed {
                    step: step.key().clone(),
                    retryable,
                }))
            }
            Commit::Conflict { .. } => Ok(AttemptResult::Conflict),
        }
    }

    fn clear_task(&self, index: &str) {
        if let Some(mut task) = self.tasks.get_mut(index) {
            task.wait_since = None;
            task.next_retry_at = None;
        }
    }

    fn release_operation(&self, index: &str) {
        if let Some(mut task) = self.tasks.get_mut(index) {
            task.pending_operation = None;
        }
    }
}

enum AttemptResult {
    Done(StepOutcome),
    Conflict,
}
