#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Lifecycle Core
//!
//! Step execution engine for policy-driven index lifecycle management: as
//! data ages, each managed index moves through phases (hot, warm, cold,
//! delete), every phase executing an ordered chain of administrative steps
//! against a shared, optimistically-versioned cluster-state document.
//!
//! ## Architecture
//!
//! The engine is a per-index state machine whose progress is persisted
//! inside the same versioned document that describes the whole cluster.
//! Steps come in four behavioral flavors (synchronous action, synchronous
//! wait, asynchronous action, asynchronous wait) behind one dispatch
//! contract; a shared driver loop schedules one lightweight logical task per
//! index, commits every transition with compare-and-swap semantics, and owns
//! all retry, backoff, and failure-escalation policy.
//!
//! ## Module Organization
//!
//! - [`step`] - Step identity, the four-flavor behavior contract, concrete steps
//! - [`execution_state`] - The persisted per-index progress record
//! - [`cluster_state`] - Versioned document model and store contract
//! - [`driver`] - The control loop advancing indices through their chains
//! - [`registry`] - Compiled per-policy step chains
//! - [`datemath`] - Date-math template resolution for generated names
//! - [`operations`] - External operation invoker contract
//! - [`config`] - Driver configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use lifecycle_core::cluster_state::{ClusterState, IndexMetadata, InMemoryClusterStateStore};
//! use lifecycle_core::step::{GenerateSnapshotNameStep, Step, StepBehavior, StepKey};
//! use lifecycle_core::registry::StepRegistry;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let complete = lifecycle_core::step::PhaseCompleteStep::new("hot");
//! let generate = GenerateSnapshotNameStep::new(
//!     StepKey::new("hot", "snapshot", "generate-snapshot-name"),
//!     complete.key().clone(),
//!     "backups",
//! );
//!
//! let mut registry = StepRegistry::new();
//! registry.register(
//!     "my-policy",
//!     vec![
//!         Step::new(
//!             generate.key().clone(),
//!             Some(generate.next_key().clone()),
//!             StepBehavior::Action(Arc::new(generate)),
//!         ),
//!         Step::new(
//!             complete.key().clone(),
//!             None,
//!             StepBehavior::Wait(Arc::new(complete)),
//!         ),
//!     ],
//! )?;
//!
//! let store = InMemoryClusterStateStore::new(
//!     ClusterState::new().with_index(IndexMetadata::new("idx1").with_policy("my-policy")),
//! );
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod cluster_state;
pub mod config;
pub mod datemath;
pub mod driver;
pub mod error;
pub mod execution_state;
pub mod logging;
pub mod operations;
pub mod registry;
pub mod step;

pub use cluster_state::{
    ClusterState, ClusterStateStore, Commit, InMemoryClusterStateStore, IndexMetadata, Version,
};
pub use config::LifecycleConfig;
pub use driver::{StepDriver, StepOutcome};
pub use error::{LifecycleError, Result};
pub use execution_state::{LifecycleExecutionState, CUSTOM_METADATA_KEY};
pub use operations::{OperationHandle, OperationInvoker, OperationParams, OperationStatus};
pub use registry::StepRegistry;
pub use step::{
    ActionStep, AsyncActionStep, AsyncWaitStep, GenerateSnapshotNameStep, PhaseCompleteStep, Step,
    StepBehavior, StepContext, StepKey, StepKind, WaitResult, WaitStep,
};
