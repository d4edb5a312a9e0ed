//! Step identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses a single step inside a policy's compiled chain.
///
/// Equality and hashing are structural over all three components, which makes
/// the key usable directly as a map key and stable across cluster-state
/// versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    phase: String,
    action: String,
    name: String,
}

impl StepKey {
    /// Construct from three non-empty components.
    ///
    /// Callers pass literal component names when compiling chains, so the
    /// non-empty precondition is a programmer-error check only. Keys decoded
    /// from persisted records are validated at the decode boundary instead,
    /// where an empty component is a typed malformed-state error.
    pub fn new(
        phase: impl Into<String>,
        action: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let key = Self {
            phase: phase.into(),
            action: action.into(),
            name: name.into(),
        };
        debug_assert!(
            !key.phase.is_empty() && !key.action.is_empty() && !key.name.is_empty(),
            "step key components must be non-empty"
        );
        key
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}/{}/{}}}", self.phase, self.action, self.name)
    }
}
