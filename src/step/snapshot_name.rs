//! # Generate-Snapshot-Name Step
//!
//! Synchronous action step that generates a globally unique snapshot name
//! for an index and records it, together with the target repository, in the
//! index's lifecycle execution state.
//!
//! The generated name has the shape `{day}-{index}-{policy}-{token}`, e.g.
//! `2020.03.30-myindex-mypolicy-cmuce-qfvmn_dstqw-ivmjc1etsa`.

use super::{ActionStep, StepContext, StepKey};
use crate::cluster_state::ClusterState;
use crate::datemath::{DateMathResolver, ResolverContext};
use crate::error::{LifecycleError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use tracing::{debug, warn};

pub const NAME: &str = "generate-snapshot-name";

/// Characters that are not legal in a snapshot (filesystem) name.
pub const INVALID_FILENAME_CHARS: &[char] =
    &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ','];

/// Generates a snapshot name and records it in the index metadata along with
/// the repository configured on the owning policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSnapshotNameStep {
    key: StepKey,
    next_key: StepKey,
    snapshot_repository: String,
}

impl GenerateSnapshotNameStep {
    pub fn new(key: StepKey, next_key: StepKey, snapshot_repository: impl Into<String>) -> Self {
        Self {
            key,
            next_key,
            snapshot_repository: snapshot_repository.into(),
        }
    }

    pub fn key(&self) -> &StepKey {
        &self.key
    }

    pub fn next_key(&self) -> &StepKey {
        &self.next_key
    }

    pub fn snapshot_repository(&self) -> &str {
        &self.snapshot_repository
    }
}

impl ActionStep for GenerateSnapshotNameStep {
    fn perform(
        &self,
        index: &str,
        state: &ClusterState,
        ctx: &StepContext,
    ) -> Result<ClusterState> {
        let Some(metadata) = state.index(index) else {
            // Index must have been deleted since the step was scheduled.
            debug!(
                action = %self.key.action(),
                index,
                "lifecycle action executed but index no longer exists"
            );
            return Ok(state.clone());
        };

        let execution_state = metadata.lifecycle_execution_state()?;
        if let Some(existing) = &execution_state.snapshot_name {
            return Err(LifecycleError::InvariantViolation(format!(
                "index {index} should not have a generated snapshot name yet but has {existing}"
            )));
        }

        let policy = metadata.policy().ok_or_else(|| {
            LifecycleError::InvariantViolation(format!(
                "index {index} is executing a lifecycle step without a policy binding"
            ))
        })?;

        let prefix = format!("<{{now/d}}-{index}-{policy}>").to_lowercase();
        let snapshot_name = generate_snapshot_name(&prefix, ctx.resolver_ctx())?;
        if let Err(err) = validate_generated_snapshot_name(&prefix, &snapshot_name) {
            warn!(
                policy,
                index,
                error = %err,
                "unable to generate a snapshot name"
            );
            return Err(err);
        }

        let updated = execution_state.with_snapshot(
            snapshot_name,
            self.snapshot_repository.clone(),
            index,
        );
        Ok(state.with_index(metadata.with_execution_state(&updated)))
    }
}

/// Resolve any date math in `name` against the context's start time and
/// append a random unique token, so expressions that expand identically for
/// two invocations still yield distinct snapshot names.
pub fn generate_snapshot_name(name: &str, ctx: &ResolverContext) -> Result<String> {
    let resolved = DateMathResolver.resolve(name, ctx)?;
    // Base64 tokens are case-sensitive, but snapshot names must be all
    // lowercase; downstream consumers depend on that guarantee, so the token
    // is folded even though that loses its case information.
    Ok(format!("{resolved}-{}", random_token().to_lowercase()))
}

fn random_token() -> String {
    let mut bytes = [0u8; 15];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Check a generated name against the snapshot naming contract. All violated
/// rules are reported together rather than short-circuiting on the first.
pub fn validate_generated_snapshot_name(prefix: &str, name: &str) -> Result<()> {
    let mut violations = Vec::new();
    if prefix.trim().is_empty() {
        violations.push(format!("invalid snapshot name [{prefix}]: cannot be empty"));
    }
    if name.contains('#') {
        violations.push(format!(
            "invalid snapshot name [{prefix}]: must not contain '#'"
        ));
    }
    if name.starts_with('_') {
        violations.push(format!(
            "invalid snapshot name [{prefix}]: must not start with '_'"
        ));
    }
    if name.to_lowercase() != name {
        violations.push(format!(
            "invalid snapshot name [{prefix}]: must be lowercase"
        ));
    }
    if name.contains(INVALID_FILENAME_CHARS) {
        violations.push(format!(
            "invalid snapshot name [{prefix}]: must not contain the following characters {INVALID_FILENAME_CHARS:?}"
        ));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(LifecycleError::Validation { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_state::IndexMetadata;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn fixed_ctx() -> StepContext {
        let start = DateTime::parse_from_rfc3339("2020-03-30T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        StepContext::new(ResolverContext::new(start))
    }

    fn step() -> GenerateSnapshotNameStep {
        GenerateSnapshotNameStep::new(
            StepKey::new("hot", "snapshot", NAME),
            StepKey::new("hot", "snapshot", "create-snapshot"),
            "backups",
        )
    }

    fn managed_state(index: &str, policy: &str) -> ClusterState {
        ClusterState::new().with_index(IndexMetadata::new(index).with_policy(policy))
    }

    #[test]
    fn generates_dated_prefix_and_records_coordinates() {
        let state = managed_state("idx1", "p1");
        let result = step().perform("idx1", &state, &fixed_ctx()).unwrap();

        let exec = result
            .index("idx1")
            .unwrap()
            .lifecycle_execution_state()
            .unwrap();
        let name = exec.snapshot_name.expect("snapshot name recorded");
        assert!(
            name.starts_with("2020.03.30-idx1-p1-"),
            "unexpected name: {name}"
        );
        assert!(name.len() > "2020.03.30-idx1-p1-".len());
        assert_eq!(exec.snapshot_repository.as_deref(), Some("backups"));
        assert_eq!(exec.snapshot_index_name.as_deref(), Some("idx1"));
    }

    #[test]
    fn generated_name_is_lowercase_for_mixed_case_inputs() {
        let state = managed_state("MyIndex", "MyPolicy");
        let result = step().perform("MyIndex", &state, &fixed_ctx()).unwrap();
        let exec = result
            .index("MyIndex")
            .unwrap()
            .lifecycle_execution_state()
            .unwrap();
        let name = exec.snapshot_name.unwrap();
        assert_eq!(name, name.to_lowercase());
        assert!(name.starts_with("2020.03.30-myindex-mypolicy-"));
    }

    #[test]
    fn missing_index_is_a_no_op() {
        let state = managed_state("other", "p1");
        let result = step().perform("idx1", &state, &fixed_ctx()).unwrap();
        assert!(result.index("idx1").is_none());
        assert!(result
            .index("other")
            .unwrap()
            .lifecycle_execution_state()
            .unwrap()
            .snapshot_name
            .is_none());
    }

    #[test]
    fn second_invocation_without_reset_is_an_invariant_violation() {
        let state = managed_state("idx1", "p1");
        let after_first = step().perform("idx1", &state, &fixed_ctx()).unwrap();
        let err = step()
            .perform("idx1", &after_first, &fixed_ctx())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvariantViolation(_)));
    }

    #[test]
    fn other_indices_are_referentially_unchanged() {
        let state = managed_state("idx1", "p1")
            .with_index(IndexMetadata::new("idx2").with_policy("p1"));
        let before = std::sync::Arc::clone(state.index("idx2").unwrap());
        let result = step().perform("idx1", &state, &fixed_ctx()).unwrap();
        assert!(std::sync::Arc::ptr_eq(&before, result.index("idx2").unwrap()));
    }

    #[test]
    fn two_generations_from_same_prefix_differ() {
        let ctx = ResolverContext::new(Utc::now());
        let first = generate_snapshot_name("<{now/d}-idx1-p1>", &ctx).unwrap();
        let second = generate_snapshot_name("<{now/d}-idx1-p1>", &ctx).unwrap();
        assert_ne!(first, second);
        assert!(validate_generated_snapshot_name("<{now/d}-idx1-p1>", &first).is_ok());
        assert!(validate_generated_snapshot_name("<{now/d}-idx1-p1>", &second).is_ok());
    }

    #[test]
    fn validator_reports_every_violation_in_one_pass() {
        let err =
            validate_generated_snapshot_name("<{now/d}-idx>", "_Bad#Name").unwrap_err();
        let LifecycleError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("must not contain '#'")));
        assert!(violations.iter().any(|v| v.contains("must not start with '_'")));
        assert!(violations.iter().any(|v| v.contains("must be lowercase")));
    }

    #[test]
    fn empty_prefix_is_flagged() {
        let err = validate_generated_snapshot_name("", "name").unwrap_err();
        let LifecycleError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        assert!(violations[0].contains("cannot be empty"));
    }

    #[test]
    fn filesystem_illegal_characters_are_flagged() {
        let err = validate_generated_snapshot_name("<p>", "bad/name with spaces").unwrap_err();
        let LifecycleError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("must not contain"));
    }

    #[test]
    fn step_equality_covers_keys_and_repository() {
        let a = step();
        let b = step();
        let other_repo = GenerateSnapshotNameStep::new(
            StepKey::new("hot", "snapshot", NAME),
            StepKey::new("hot", "snapshot", "create-snapshot"),
            "other-repo",
        );
        assert_eq!(a, b);
        assert_ne!(a, other_repo);
    }

    proptest! {
        #[test]
        fn generated_names_always_satisfy_the_contract(
            index in "[a-z][a-z0-9]{0,10}",
            policy in "[a-z][a-z0-9]{0,10}",
        ) {
            let ctx = ResolverContext::new(Utc::now());
            let prefix = format!("<{{now/d}}-{index}-{policy}>");
            let name = generate_snapshot_name(&prefix, &ctx).unwrap();
            prop_assert_eq!(name.clone(), name.to_lowercase());
            prop_assert!(!name.contains('#'));
            prop_assert!(!name.starts_with('_'));
            prop_assert!(validate_generated_snapshot_name(&prefix, &name).is_ok());
        }
    }
}
