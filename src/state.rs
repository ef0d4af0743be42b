//! File-backed state store
//!
//! All records of one stack live in a single JSON document. Every write
//! goes to a sibling temp file first and is renamed over the original, so
//! a crash mid-write leaves the previous document intact.

use crate::error::Error;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge::{ProvisioningRecord, StateStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// On-disk layout of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub stack: String,

    #[serde(default)]
    pub records: BTreeMap<String, ProvisioningRecord>,

    /// Last time the state was written
    pub last_updated: DateTime<Utc>,
}

impl StateFile {
    fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            records: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// [`StateStore`] persisted to a JSON file
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl FileStateStore {
    /// Open the state of `stack` at `path`, starting empty if the file
    /// does not exist yet
    pub fn open(path: impl Into<PathBuf>, stack: &str) -> Result<Self> {
        let path = path.into();

        let state = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            let state: StateFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
            if state.stack != stack {
                return Err(Error::StackMismatch {
                    path,
                    expected: stack.to_string(),
                    found: state.stack,
                }
                .into());
            }
            log::debug!(
                "Loaded {} records from {}",
                state.records.len(),
                path.display()
            );
            state
        } else {
            log::debug!("State file {} does not exist, starting empty", path.display());
            StateFile::new(stack)
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the state was last written
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.lock().last_updated
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and write the result; memory is only updated once
    /// the file is on disk
    fn modify(&self, change: impl FnOnce(&mut StateFile)) -> Result<(), StoreError> {
        let mut state = self.lock();
        let mut next = state.clone();
        change(&mut next);
        next.last_updated = Utc::now();
        write_atomic(&self.path, &next)?;
        *state = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, state: &StateFile) -> Result<(), StoreError> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }

    let content = serde_json::to_string_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    log::trace!("Saved state to {}", path.display());
    Ok(())
}

impl StateStore for FileStateStore {
    fn get(&self, name: &str) -> Result<Option<ProvisioningRecord>, StoreError> {
        Ok(self.lock().records.get(name).cloned())
    }

    fn put(&self, record: ProvisioningRecord) -> Result<(), StoreError> {
        self.modify(|state| {
            state.records.insert(record.name.clone(), record);
        })
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        if !self.lock().records.contains_key(name) {
            return Ok(());
        }
        self.modify(|state| {
            state.records.remove(name);
        })
    }

    fn list(&self) -> Result<Vec<ProvisioningRecord>, StoreError> {
        Ok(self.lock().records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{LifecyclePolicy, Outputs, ResourceKind};
    use serde_json::json;

    fn record(name: &str) -> ProvisioningRecord {
        ProvisioningRecord {
            name: name.to_string(),
            kind: ResourceKind::Container,
            provider_id: format!("ctr-{name}"),
            properties_hash: "0123".to_string(),
            outputs: Outputs::from([("host".to_string(), json!(format!("{name}.local")))]),
            policy: LifecyclePolicy::Destroy,
            dependencies: vec!["net".to_string()],
        }
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStateStore::open(&path, "invidious").unwrap();
        assert!(store.list().unwrap().is_empty());
        store.put(record("db")).unwrap();
        store.put(record("app")).unwrap();
        store.remove("app").unwrap();
        assert!(path.exists());

        let reopened = FileStateStore::open(&path, "invidious").unwrap();
        assert_eq!(reopened.get("db").unwrap(), Some(record("db")));
        assert!(reopened.get("app").unwrap().is_none());
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::open(&path, "invidious").unwrap();
        store.put(record("db")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }

    #[test]
    fn test_missing_file_is_not_created_until_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::open(&path, "invidious").unwrap();
        store.remove("nothing").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_rejects_other_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::open(&path, "invidious")
            .unwrap()
            .put(record("db"))
            .unwrap();

        let err = FileStateStore::open(&path, "other").unwrap_err();
        assert!(err.to_string().contains("belongs to stack 'invidious'"));
    }

    #[test]
    fn test_corrupt_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileStateStore::open(&path, "invidious").unwrap_err();
        assert!(err.to_string().contains("Failed to parse state file"));
    }

    #[test]
    fn test_last_updated_advances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("s.json"), "invidious").unwrap();
        let before = store.last_updated();
        store.put(record("db")).unwrap();
        assert!(store.last_updated() >= before);
    }
}
