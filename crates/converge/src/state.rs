//! State store interface and provisioning records

use crate::error::StoreError;
use crate::resource::{LifecyclePolicy, ResourceKind};
use crate::types::Outputs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Last known concrete state of a provisioned resource
///
/// Exists iff the resource was created successfully at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub name: String,
    pub kind: ResourceKind,
    pub provider_id: String,
    /// Hash of the resolved properties last applied
    pub properties_hash: String,
    #[serde(default)]
    pub outputs: Outputs,
    pub policy: LifecyclePolicy,
    /// Predecessors at the time of the last apply
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Persistent mapping from logical name to [`ProvisioningRecord`]
///
/// The scheduler is the only writer of a given name during a run, so a
/// `get` followed by `put` for one name is never interleaved with another
/// writer of that name.
pub trait StateStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<ProvisioningRecord>, StoreError>;

    fn put(&self, record: ProvisioningRecord) -> Result<(), StoreError>;

    fn remove(&self, name: &str) -> Result<(), StoreError>;

    /// Every record, ordered by name
    fn list(&self) -> Result<Vec<ProvisioningRecord>, StoreError>;
}

/// In-process state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, ProvisioningRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing records
    pub fn with_records(records: impl IntoIterator<Item = ProvisioningRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.name.clone(), r)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, name: &str) -> Result<Option<ProvisioningRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(name).cloned())
    }

    fn put(&self, record: ProvisioningRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.name.clone(), record);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ProvisioningRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ProvisioningRecord {
        ProvisioningRecord {
            name: name.to_string(),
            kind: ResourceKind::Volume,
            provider_id: format!("vol-{name}"),
            properties_hash: "abc".to_string(),
            outputs: Outputs::new(),
            policy: LifecyclePolicy::Destroy,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(store.get("data").unwrap().is_none());

        store.put(record("data")).unwrap();
        store.put(record("cache")).unwrap();
        assert_eq!(store.get("data").unwrap().unwrap().provider_id, "vol-data");
        assert_eq!(
            store
                .list()
                .unwrap()
                .into_iter()
                .map(|r| r.name)
                .collect::<Vec<_>>(),
            vec!["cache", "data"]
        );

        store.remove("data").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_record_serde_defaults() {
        let json = r#"{
            "name": "net",
            "kind": "network",
            "provider_id": "n1",
            "properties_hash": "h",
            "policy": "retain"
        }"#;
        let record: ProvisioningRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, ResourceKind::Network);
        assert_eq!(record.policy, LifecyclePolicy::Retain);
        assert!(record.outputs.is_empty());
        assert!(record.dependencies.is_empty());
    }
}
