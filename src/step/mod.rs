//! # Step Abstraction
//!
//! The unit of lifecycle work. Every step knows its own [`StepKey`] and the
//! key of its successor; behavior comes in exactly four flavors, modeled as
//! a closed [`StepBehavior`] enum over trait objects rather than an open
//! hierarchy. The driver dispatches on the variant to decide whether to
//! commit immediately, re-poll on a cadence, or track an external operation.
//!
//! Steps receive the cluster state as a consistent snapshot and return a
//! candidate replacement (or a condition verdict). They hold no retry or
//! backoff logic and never write through to the store.

pub mod key;
pub mod phase_complete;
pub mod snapshot_name;

pub use key::StepKey;
pub use phase_complete::PhaseCompleteStep;
pub use snapshot_name::GenerateSnapshotNameStep;

use crate::cluster_state::ClusterState;
use crate::datemath::ResolverContext;
use crate::error::Result;
use crate::operations::{OperationParams, OperationStatus};
use std::fmt;
use std::sync::Arc;

/// Per-invocation context threaded into steps by the driver: the resolver
/// context pins the wall-clock instant so a retried invocation within one
/// attempt sees one consistent "now".
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    resolver_ctx: ResolverContext,
}

impl StepContext {
    pub fn new(resolver_ctx: ResolverContext) -> Self {
        Self { resolver_ctx }
    }

    pub fn at_now() -> Self {
        Self::new(ResolverContext::now())
    }

    pub fn resolver_ctx(&self) -> &ResolverContext {
        &self.resolver_ctx
    }
}

/// Verdict of a wait-style step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    pub met: bool,
    pub message: Option<String>,
}

impl WaitResult {
    pub fn met() -> Self {
        Self {
            met: true,
            message: None,
        }
    }

    pub fn not_met(message: impl Into<String>) -> Self {
        Self {
            met: false,
            message: Some(message.into()),
        }
    }
}

/// Synchronous cluster-state mutation. Must be idempotent under retry from
/// the same starting snapshot: re-running it may produce an equivalent but
/// not byte-identical result (e.g. a fresh unique name).
pub trait ActionStep: Send + Sync {
    fn perform(&self, index: &str, state: &ClusterState, ctx: &StepContext)
        -> Result<ClusterState>;
}

/// Synchronous read-only condition check, re-evaluated on the driver's
/// polling cadence.
pub trait WaitStep: Send + Sync {
    fn is_condition_met(&self, index: &str, state: &ClusterState) -> Result<WaitResult>;
}

/// Initiates a long-running external operation. The step only describes the
/// operation; the driver starts it through the invoker exactly once per
/// attempt and then tracks the handle.
pub trait AsyncActionStep: Send + Sync {
    fn operation(&self, index: &str, state: &ClusterState) -> Result<OperationParams>;
}

/// Interprets poll results for an operation started earlier in the chain.
/// Invoked arbitrarily many times; must never re-initiate the operation.
pub trait AsyncWaitStep: Send + Sync {
    fn on_status(&self, index: &str, status: &OperationStatus) -> Result<WaitResult>;
}

/// The four behavioral flavors a step can take.
#[derive(Clone)]
pub enum StepBehavior {
    Action(Arc<dyn ActionStep>),
    Wait(Arc<dyn WaitStep>),
    AsyncAction(Arc<dyn AsyncActionStep>),
    AsyncWait(Arc<dyn AsyncWaitStep>),
}

/// Discriminant of [`StepBehavior`], for logging and driver bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Action,
    Wait,
    AsyncAction,
    AsyncWait,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Wait => write!(f, "wait"),
            Self::AsyncAction => write!(f, "async-action"),
            Self::AsyncWait => write!(f, "async-wait"),
        }
    }
}

/// A step in a compiled policy chain: identity, successor, retry class, and
/// behavior.
#[derive(Clone)]
pub struct Step {
    key: StepKey,
    next_key: Option<StepKey>,
    retryable: bool,
    behavior: StepBehavior,
}

impl Step {
    pub fn new(key: StepKey, next_key: Option<StepKey>, behavior: StepBehavior) -> Self {
        Self {
            key,
            next_key,
            retryable: false,
            behavior,
        }
    }

    /// Mark failures of this step as automatically retryable by the driver.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn key(&self) -> &StepKey {
        &self.key
    }

    /// The declared successor. `None` marks a phase-terminal step.
    pub fn next_key(&self) -> Option<&StepKey> {
        self.next_key.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn behavior(&self) -> &StepBehavior {
        &self.behavior
    }

    pub fn kind(&self) -> StepKind {
        match self.behavior {
            StepBehavior::Action(_) => StepKind::Action,
            StepBehavior::Wait(_) => StepKind::Wait,
            StepBehavior::AsyncAction(_) => StepKind::AsyncAction,
            StepBehavior::AsyncWait(_) => StepKind::AsyncWait,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("next_key", &self.next_key)
            .field("retryable", &self.retryable)
            .field("kind", &self.kind())
            .finish()
    }
}
