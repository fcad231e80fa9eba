//! Account store: atomic partial updates over persisted credential records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use genpool_core::{Error, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::types::{AccountPatch, AccountRecord};

/// Persistence boundary for credential records, keyed by worker identity.
pub trait AccountStore: Send + Sync {
    /// Get a record by ID.
    fn get(&self, id: &str) -> Option<AccountRecord>;

    /// List all records.
    fn list(&self) -> Vec<AccountRecord>;

    /// Insert or replace a record.
    fn insert(&self, record: AccountRecord) -> Result<()>;

    /// Merge `patch` into the record atomically and return the merged record.
    fn update(&self, id: &str, patch: AccountPatch) -> Result<AccountRecord>;

    /// Delete a record. Returns true if found and deleted.
    fn remove(&self, id: &str) -> Result<bool>;
}

/// Directory-backed store: one pretty-printed JSON file per account.
pub struct JsonAccountStore {
    dir: PathBuf,
    records: RwLock<HashMap<String, AccountRecord>>,
}

impl JsonAccountStore {
    /// Open a store directory, loading every `*.json` record in it.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let records = load_records(dir)?;
        info!("JsonAccountStore: {} accounts loaded from {}", records.len(), dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            records: RwLock::new(records),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let safe_id: String = id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_id))
    }

    /// Write to a sibling temp file then rename over the target.
    fn persist(&self, record: &AccountRecord) -> Result<()> {
        let path = self.path_for(&record.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl AccountStore for JsonAccountStore {
    fn get(&self, id: &str) -> Option<AccountRecord> {
        self.records.read().get(id).cloned()
    }

    fn list(&self) -> Vec<AccountRecord> {
        let mut records: Vec<AccountRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn insert(&self, record: AccountRecord) -> Result<()> {
        let mut records = self.records.write();
        self.persist(&record)?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(&self, id: &str, patch: AccountPatch) -> Result<AccountRecord> {
        let mut records = self.records.write();
        let current = records
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;

        let mut merged = current.clone();
        merged.apply(patch);
        // Commit in memory only once the file is on disk.
        self.persist(&merged)?;
        records.insert(id.to_string(), merged.clone());
        debug!(account = id, "account record updated");
        Ok(merged)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write();
        let removed = records.remove(id).is_some();
        if removed {
            match std::fs::remove_file(self.path_for(id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

fn load_records(dir: &Path) -> Result<HashMap<String, AccountRecord>> {
    let mut records = HashMap::new();

    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };

        match serde_json::from_str::<AccountRecord>(&data) {
            Ok(record) => {
                records.insert(record.id.clone(), record);
            }
            Err(e) => warn!("Skipping malformed account file {}: {}", path.display(), e),
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionCookie;

    fn store_with(records: &[AccountRecord]) -> (tempfile::TempDir, JsonAccountStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAccountStore::open(dir.path()).unwrap();
        for record in records {
            store.insert(record.clone()).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_insert_and_reload() {
        let (dir, store) = store_with(&[AccountRecord::new("a1", "a@example.com", "pw")]);
        store
            .update(
                "a1",
                AccountPatch {
                    cookies: Some(vec![SessionCookie::new("__client", "abc", "clerk.flux1.ai")]),
                    ..Default::default()
                },
            )
            .unwrap();
        drop(store);

        let reopened = JsonAccountStore::open(dir.path()).unwrap();
        assert_eq!(reopened.dir(), dir.path());
        let record = reopened.get("a1").unwrap();
        assert!(record.has_cookie("__client"));
        assert!(dir.path().join("a1.json").exists());
        assert!(!dir.path().join("a1.json.tmp").exists());
    }

    #[test]
    fn test_update_missing_account() {
        let (_dir, store) = store_with(&[]);
        let err = store.update("ghost", AccountPatch::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_concurrent_use_counts_are_not_lost() {
        let (_dir, store) = store_with(&[AccountRecord::new("a1", "a@example.com", "pw")]);
        let store = std::sync::Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update(
                            "a1",
                            AccountPatch {
                                record_use: Some(1_000 + i),
                                ..Default::default()
                            },
                        )
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("a1").unwrap().use_count, 8);
    }

    #[test]
    fn test_remove_deletes_file() {
        let (dir, store) = store_with(&[AccountRecord::new("a1", "a@example.com", "pw")]);
        assert!(store.remove("a1").unwrap());
        assert!(!store.remove("a1").unwrap());
        assert!(!dir.path().join("a1.json").exists());
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let store = JsonAccountStore::open(dir.path()).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_ids_are_sanitized_for_filenames() {
        let (dir, store) = store_with(&[AccountRecord::new("team/a b", "a@example.com", "pw")]);
        assert!(store.get("team/a b").is_some());
        assert!(dir.path().join("team_a_b.json").exists());
    }
}
