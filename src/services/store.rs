//! Durable mapping from EntraID object id to identity document location.
//!
//! Filenames derive from display names, which are only reliable at first
//! provisioning; this store is what lets later update and delete events find
//! the existing document without re-deriving anything.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::identity::IdentityStatus;

/// One stored mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub scim_id: String,
    pub name: String,
    pub filename: String,
    pub status: IdentityStatus,
    pub updated_at: DateTime<Utc>,
}

/// JSON-file-backed store. One lock covers every operation end to end,
/// including the durable write; the lock is never held across an await.
pub struct UserStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, UserEntry>>,
}

impl UserStore {
    /// Opens the store. A missing file is an empty store; a file that exists
    /// but does not parse is fatal, since starting with a guessed-empty store
    /// would silently orphan every document already provisioned.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).with_context(|| {
                format!("user store {} is corrupt; refusing to start", path.display())
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read user store {}", path.display()))
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, scim_id: &str) -> Option<UserEntry> {
        self.entries
            .lock()
            .expect("user store lock poisoned")
            .get(scim_id)
            .cloned()
    }

    /// Upserts an entry and persists the full data set before releasing the
    /// lock.
    pub fn put(&self, entry: UserEntry) -> Result<()> {
        let mut entries = self.entries.lock().expect("user store lock poisoned");
        entries.insert(entry.scim_id.clone(), entry);
        self.persist(&entries)
    }

    /// Every entry, ordered by external id. Backs provider-initiated
    /// reconciliation listings.
    pub fn list(&self) -> Vec<UserEntry> {
        self.entries
            .lock()
            .expect("user store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    // Full rewrite to a sibling temp file, then atomic rename. A crash
    // mid-write leaves the previous store intact.
    fn persist(&self, entries: &BTreeMap<String, UserEntry>) -> Result<()> {
        let raw = serde_json::to_string_pretty(entries).context("failed to encode user store")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, name: &str) -> UserEntry {
        UserEntry {
            scim_id: id.to_string(),
            name: name.to_string(),
            filename: format!("entraid_human_{}.yaml", name.to_lowercase()),
            status: IdentityStatus::Active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = UserStore::open(dir.path().join("user_store.json")).unwrap();
        assert!(store.list().is_empty());
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = UserStore::open(dir.path().join("user_store.json")).unwrap();

        store.put(entry("id-1", "alice")).unwrap();
        let got = store.get("id-1").unwrap();
        assert_eq!(got.name, "alice");
        assert_eq!(got.filename, "entraid_human_alice.yaml");
    }

    #[test]
    fn put_is_upsert() {
        let dir = tempdir().unwrap();
        let store = UserStore::open(dir.path().join("user_store.json")).unwrap();

        store.put(entry("id-1", "alice")).unwrap();
        let mut updated = entry("id-1", "alice");
        updated.status = IdentityStatus::Deactivated;
        store.put(updated).unwrap();

        assert_eq!(store.list().len(), 1);
        assert_eq!(
            store.get("id-1").unwrap().status,
            IdentityStatus::Deactivated
        );
    }

    #[test]
    fn list_is_ordered_by_external_id() {
        let dir = tempdir().unwrap();
        let store = UserStore::open(dir.path().join("user_store.json")).unwrap();

        store.put(entry("id-b", "bob")).unwrap();
        store.put(entry("id-a", "alice")).unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|e| e.scim_id).collect();
        assert_eq!(ids, vec!["id-a", "id-b"]);
    }

    #[test]
    fn persisted_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_store.json");

        let store = UserStore::open(path.clone()).unwrap();
        store.put(entry("id-1", "alice")).unwrap();
        drop(store);

        let reopened = UserStore::open(path).unwrap();
        assert_eq!(reopened.get("id-1").unwrap().name, "alice");
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_store.json");
        let store = UserStore::open(path.clone()).unwrap();
        store.put(entry("id-1", "alice")).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_refuses_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_store.json");
        fs::write(&path, "{not json").unwrap();

        assert!(UserStore::open(path).is_err());
    }
}
