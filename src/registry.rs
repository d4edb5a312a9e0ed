//! # Compiled Step Chains
//!
//! Registry of the ordered step chains produced by policy compilation (an
//! external concern). The driver resolves the step instance for an index's
//! current key here; registration validates the linkage invariant so a
//! persisted `current_step_key` can always be resolved or reported as a
//! typed error, never followed off the end of a chain.

use crate::error::{LifecycleError, Result};
use crate::step::{Step, StepKey};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
struct StepChain {
    steps: Vec<Arc<Step>>,
    by_key: HashMap<StepKey, usize>,
}

/// Policy name to compiled chain mapping.
#[derive(Default, Clone)]
pub struct StepRegistry {
    policies: HashMap<String, StepChain>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy's compiled chain. Fails if the chain is empty,
    /// contains duplicate keys, or declares a successor that is not part of
    /// the chain.
    pub fn register(&mut self, policy: impl Into<String>, steps: Vec<Step>) -> Result<()> {
        let policy = policy.into();
        if steps.is_empty() {
            return Err(LifecycleError::Configuration(format!(
                "policy {policy} compiled to an empty step chain"
            )));
        }

        let mut by_key = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if by_key.insert(step.key().clone(), position).is_some() {
                return Err(LifecycleError::Configuration(format!(
                    "policy {policy} contains duplicate step key {}",
                    step.key()
                )));
            }
        }
        for step in &steps {
            if let Some(next) = step.next_key() {
                if !by_key.contains_key(next) {
                    return Err(LifecycleError::Configuration(format!(
                        "policy {policy} step {} links to unknown successor {next}",
                        step.key()
                    )));
                }
            }
        }

        self.policies.insert(
            policy,
            StepChain {
                steps: steps.into_iter().map(Arc::new).collect(),
                by_key,
            },
        );
        Ok(())
    }

    /// Resolve a step by key within a policy's chain.
    pub fn step(&self, policy: &str, key: &StepKey) -> Result<Arc<Step>> {
        self.policies
            .get(policy)
            .and_then(|chain| chain.by_key.get(key).map(|&i| Arc::clone(&chain.steps[i])))
            .ok_or_else(|| LifecycleError::UnknownStep {
                policy: policy.to_string(),
                key: key.to_string(),
            })
    }

    /// The entry step an index starts on when first placed under a policy.
    pub fn first_step(&self, policy: &str) -> Option<Arc<Step>> {
        self.policies
            .get(policy)
            .map(|chain| Arc::clone(&chain.steps[0]))
    }

    pub fn has_policy(&self, policy: &str) -> bool {
        self.policies.contains_key(policy)
    }
}
