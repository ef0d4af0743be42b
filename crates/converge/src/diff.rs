//! Change detection against the last applied state

use crate::resource::{LifecyclePolicy, ResourceKind};
use crate::state::ProvisioningRecord;
use crate::types::ResolvedProperties;
use blake3::Hasher;

/// What the scheduler has to do to converge one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No record yet
    Create,
    /// Record matches the desired properties
    NoOp,
    /// Properties changed and the kind can be updated in place
    Update { provider_id: String },
    /// Properties changed and the resource must be destroyed and recreated
    Replace { provider_id: String },
    /// Replacement needed but the lifecycle policy forbids destruction
    RetainViolation { provider_id: String },
}

/// BLAKE3 hash of a kind and its resolved properties
///
/// Keys are visited in sorted order and values are rendered as compact
/// JSON (object keys sorted), so equal inputs always hash equally.
pub fn properties_hash(kind: ResourceKind, properties: &ResolvedProperties) -> String {
    let mut hasher = Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    for (key, value) in properties {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Decide how to converge a resource given its last record
pub fn plan_action(
    record: Option<&ProvisioningRecord>,
    kind: ResourceKind,
    policy: LifecyclePolicy,
    hash: &str,
) -> Action {
    let Some(record) = record else {
        return Action::Create;
    };
    if record.kind == kind && record.properties_hash == hash {
        return Action::NoOp;
    }

    let provider_id = record.provider_id.clone();
    if record.kind == kind && kind.supports_update() {
        Action::Update { provider_id }
    } else if policy == LifecyclePolicy::Retain {
        Action::RetainViolation { provider_id }
    } else {
        Action::Replace { provider_id }
    }
}
