//! # External Operation Invoker
//!
//! Contract for the subsystem that actually performs long-running maintenance
//! operations (snapshot creation, shrink). The step engine only starts
//! operations and polls for their outcome; execution itself is an external
//! collaborator behind this seam, which also keeps driver tests free of real
//! I/O.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Description of an operation to start: a well-known operation name plus a
/// free-form JSON payload the executing subsystem interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationParams {
    pub operation: String,
    pub payload: serde_json::Value,
}

impl OperationParams {
    pub fn new(operation: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
        }
    }
}

/// Opaque handle for a started operation, used for subsequent polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    id: Uuid,
    operation: String,
}

impl OperationHandle {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// Outcome of polling a previously started operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
    Failed(String),
}

/// Starts operations and reports their progress. Implementations must treat
/// `poll` as idempotent; the driver calls it on every scheduling pass while
/// an operation is outstanding.
#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn start(&self, params: OperationParams) -> Result<OperationHandle>;
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}
