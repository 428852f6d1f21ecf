// Durable store for dataset files.
// Replaces a key's current file through a staged write and rename rotation so a
// crash never leaves a key without a readable current value.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{DataFileError, Result};
use crate::remote::DatasetPayload;

use super::paths::{current_path, leftover_key, previous_path, staging_path};

/// What `recover` found and did for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No leftover files.
    Clean,
    /// Current file was kept; stale staging/previous files were removed.
    DiscardedLeftovers,
    /// Current file was missing and the fully written staging file was promoted.
    PromotedStaged,
    /// Current file was missing and the previous value was put back.
    RestoredPrevious,
}

/// File area holding one current value per dataset key.
#[derive(Debug, Clone)]
pub struct DurableStore {
    root: PathBuf,
}

impl DurableStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if a current value exists for the key.
    pub fn exists(&self, key: &str) -> bool {
        current_path(&self.root, key).is_file()
    }

    /// Read the raw bytes of the current value.
    pub fn read_current(&self, key: &str) -> Result<Vec<u8>> {
        let path = current_path(&self.root, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DataFileError::NotFound(key.to_string()))
            }
            Err(e) => Err(DataFileError::corrupt(key, e.to_string())),
        }
    }

    /// Read and parse the current value.
    pub fn read_payload(&self, key: &str) -> Result<DatasetPayload> {
        let bytes = self.read_current(key)?;
        DatasetPayload::from_bytes(&bytes).map_err(|e| DataFileError::corrupt(key, e.to_string()))
    }

    /// Modification time of the current value.
    pub fn modified_at(&self, key: &str) -> Result<DateTime<Utc>> {
        let path = current_path(&self.root, key);
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => DataFileError::NotFound(key.to_string()),
                _ => DataFileError::Io(e),
            })?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Replace the current value. After this returns, successfully or not,
    /// `read_current` yields either the old bytes or the new bytes in full.
    pub fn write_current_atomically(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|source| DataFileError::Write {
            path: self.root.clone(),
            source,
        })?;

        let current = current_path(&self.root, key);
        let staging = staging_path(&self.root, key);
        let previous = previous_path(&self.root, key);

        if let Err(source) = write_synced(&staging, bytes) {
            let _ = fs::remove_file(&staging);
            return Err(DataFileError::Write {
                path: staging,
                source,
            });
        }

        // A previous value left by an interrupted rotation is superseded
        if previous.exists() {
            fs::remove_file(&previous).map_err(|source| DataFileError::Write {
                path: previous.clone(),
                source,
            })?;
        }

        let had_current = current.exists();
        if had_current {
            if let Err(source) = fs::rename(&current, &previous) {
                let _ = fs::remove_file(&staging);
                return Err(DataFileError::Write {
                    path: current,
                    source,
                });
            }
        }

        if let Err(source) = fs::rename(&staging, &current) {
            if had_current {
                if let Err(e) = fs::rename(&previous, &current) {
                    warn!(key, error = %e, "Could not restore previous data file");
                }
            }
            return Err(DataFileError::Write {
                path: current,
                source,
            });
        }

        if had_current {
            if let Err(e) = fs::remove_file(&previous) {
                warn!(key, error = %e, "Could not remove previous data file");
            }
        }

        sync_dir(&self.root);
        debug!(key, bytes = bytes.len(), "Data file persisted");
        Ok(())
    }

    /// Serialize and persist a payload.
    pub fn write_payload(&self, key: &str, payload: &DatasetPayload) -> Result<()> {
        let bytes = payload.to_bytes()?;
        self.write_current_atomically(key, &bytes)
    }

    /// Repair the files of one key after an interrupted rotation.
    pub fn recover(&self, key: &str) -> Result<Recovery> {
        let current = current_path(&self.root, key);
        let staging = staging_path(&self.root, key);
        let previous = previous_path(&self.root, key);

        let has_staging = staging.exists();
        let has_previous = previous.exists();

        if current.exists() {
            if !has_staging && !has_previous {
                return Ok(Recovery::Clean);
            }
            remove_if_exists(&staging)?;
            remove_if_exists(&previous)?;
            info!(key, "Discarded leftover data file rotation");
            return Ok(Recovery::DiscardedLeftovers);
        }

        // Staging is only trusted when it parses; a first write may have been cut short
        if has_staging && is_valid_document(&staging) {
            fs::rename(&staging, &current)?;
            remove_if_exists(&previous)?;
            sync_dir(&self.root);
            info!(key, "Promoted staged data file");
            return Ok(Recovery::PromotedStaged);
        }

        remove_if_exists(&staging)?;

        if has_previous {
            fs::rename(&previous, &current)?;
            sync_dir(&self.root);
            info!(key, "Restored previous data file");
            return Ok(Recovery::RestoredPrevious);
        }

        Ok(if has_staging {
            Recovery::DiscardedLeftovers
        } else {
            Recovery::Clean
        })
    }

    /// Scan the whole store and repair every key with leftover files.
    /// Returns the number of keys that needed repair.
    pub fn recover_all(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                leftover_key(&name.to_string_lossy())
            })
            .collect();
        keys.sort();
        keys.dedup();

        let mut repaired = 0;
        for key in &keys {
            if self.recover(key)? != Recovery::Clean {
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// Delete every file belonging to the key.
    pub fn remove(&self, key: &str) -> Result<()> {
        remove_if_exists(&current_path(&self.root, key))?;
        remove_if_exists(&staging_path(&self.root, key))?;
        remove_if_exists(&previous_path(&self.root, key))?;
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn is_valid_document(path: &Path) -> bool {
    fs::read(path)
        .ok()
        .is_some_and(|bytes| DatasetPayload::from_bytes(&bytes).is_ok())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(dir) = fs::File::open(dir) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, DurableStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = DurableStore::new(temp_dir.path().join("data"));
        (temp_dir, store)
    }

    #[test]
    fn test_write_creates_dir_and_reads_back() {
        let (_temp, store) = store();
        assert!(!store.root().exists());
        assert!(!store.exists("prefixes"));

        store.write_current_atomically("prefixes", b"{\"v\":1}").unwrap();

        assert!(store.exists("prefixes"));
        assert_eq!(store.read_current("prefixes").unwrap(), b"{\"v\":1}");
        assert!(!staging_path(store.root(), "prefixes").exists());
        assert!(!previous_path(store.root(), "prefixes").exists());
    }

    #[test]
    fn test_replace_leaves_single_file() {
        let (_temp, store) = store();
        store.write_current_atomically("k", b"{\"v\":1}").unwrap();
        store.write_current_atomically("k", b"{\"v\":2}").unwrap();

        assert_eq!(store.read_current("k").unwrap(), b"{\"v\":2}");
        let names: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k.json"]);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_temp, store) = store();
        assert!(store.read_current("missing").unwrap_err().is_not_found());
        assert!(store.modified_at("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unparseable_is_corrupt() {
        let (_temp, store) = store();
        store.write_current_atomically("bad", b"{not json").unwrap();

        let err = store.read_payload("bad").unwrap_err();
        assert!(matches!(err, DataFileError::Corrupt { key, .. } if key == "bad"));
    }

    #[test]
    fn test_payload_round_trip() {
        let (_temp, store) = store();
        let payload = DatasetPayload::new(json!({ "table": ["K", "VE"], "date": "2024-01-01T00:00:00Z" }));
        store.write_payload("prefixes", &payload).unwrap();
        assert_eq!(store.read_payload("prefixes").unwrap(), payload);
    }

    #[test]
    fn test_crash_before_rotation_keeps_old_value() {
        let (_temp, store) = store();
        store.write_current_atomically("k", b"{\"v\":1}").unwrap();
        // Staging written, rotation never started
        fs::write(staging_path(store.root(), "k"), b"{\"v\":2}").unwrap();

        assert_eq!(store.recover("k").unwrap(), Recovery::DiscardedLeftovers);
        assert_eq!(store.read_current("k").unwrap(), b"{\"v\":1}");
        assert!(!staging_path(store.root(), "k").exists());
    }

    #[test]
    fn test_crash_mid_rotation_promotes_new_value() {
        let (_temp, store) = store();
        fs::create_dir_all(store.root()).unwrap();
        // Current already moved aside, staging not yet renamed
        fs::write(previous_path(store.root(), "k"), b"{\"v\":1}").unwrap();
        fs::write(staging_path(store.root(), "k"), b"{\"v\":2}").unwrap();

        assert_eq!(store.recover("k").unwrap(), Recovery::PromotedStaged);
        assert_eq!(store.read_current("k").unwrap(), b"{\"v\":2}");
        assert!(!previous_path(store.root(), "k").exists());
    }

    #[test]
    fn test_crash_with_partial_staging_restores_previous() {
        let (_temp, store) = store();
        fs::create_dir_all(store.root()).unwrap();
        fs::write(previous_path(store.root(), "k"), b"{\"v\":1}").unwrap();
        fs::write(staging_path(store.root(), "k"), b"{\"v\":").unwrap();

        assert_eq!(store.recover("k").unwrap(), Recovery::RestoredPrevious);
        assert_eq!(store.read_current("k").unwrap(), b"{\"v\":1}");
        assert!(!staging_path(store.root(), "k").exists());
    }

    #[test]
    fn test_crash_during_first_write_leaves_nothing() {
        let (_temp, store) = store();
        fs::create_dir_all(store.root()).unwrap();
        fs::write(staging_path(store.root(), "k"), b"{\"tab").unwrap();

        assert_eq!(store.recover("k").unwrap(), Recovery::DiscardedLeftovers);
        assert!(store.read_current("k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_leftover_previous_after_finished_rotation() {
        let (_temp, store) = store();
        store.write_current_atomically("k", b"{\"v\":2}").unwrap();
        fs::write(previous_path(store.root(), "k"), b"{\"v\":1}").unwrap();

        assert_eq!(store.recover("k").unwrap(), Recovery::DiscardedLeftovers);
        assert_eq!(store.read_current("k").unwrap(), b"{\"v\":2}");
    }

    #[test]
    fn test_recover_all_scans_directory() {
        let (_temp, store) = store();
        assert_eq!(store.recover_all().unwrap(), 0);

        store.write_current_atomically("a", b"{\"v\":1}").unwrap();
        store.write_current_atomically("b", b"{\"v\":1}").unwrap();
        fs::write(staging_path(store.root(), "a"), b"{\"v\":2}").unwrap();
        fs::write(previous_path(store.root(), "c"), b"{\"v\":3}").unwrap();

        assert_eq!(store.recover_all().unwrap(), 2);
        assert_eq!(store.read_current("a").unwrap(), b"{\"v\":1}");
        assert_eq!(store.read_current("b").unwrap(), b"{\"v\":1}");
        assert_eq!(store.read_current("c").unwrap(), b"{\"v\":3}");
    }

    #[test]
    fn test_similar_keys_do_not_share_files() {
        let (_temp, store) = store();
        store.write_current_atomically("ref/pota", b"{\"src\":\"slash\"}").unwrap();

        assert!(!store.exists("ref_pota"));
        assert!(store.read_current("ref_pota").unwrap_err().is_not_found());

        store.write_current_atomically("ref_pota", b"{\"src\":\"underscore\"}").unwrap();
        fs::write(staging_path(store.root(), "ref/pota"), b"{\"src\":\"staged\"}").unwrap();
        assert_eq!(store.recover_all().unwrap(), 1);
        store.remove("ref_pota").unwrap();

        assert_eq!(store.read_current("ref/pota").unwrap(), b"{\"src\":\"slash\"}");
        assert!(!store.exists("ref_pota"));
    }

    #[test]
    fn test_remove_deletes_all_files() {
        let (_temp, store) = store();
        store.write_current_atomically("k", b"{}").unwrap();
        fs::write(staging_path(store.root(), "k"), b"{}").unwrap();

        store.remove("k").unwrap();
        assert!(!store.exists("k"));
        assert!(!staging_path(store.root(), "k").exists());
        store.remove("k").unwrap();
    }

    #[test]
    fn test_modified_at_is_recent() {
        let (_temp, store) = store();
        store.write_current_atomically("k", b"{}").unwrap();
        let age = Utc::now().signed_duration_since(store.modified_at("k").unwrap());
        assert!(age < chrono::Duration::minutes(1));
    }
}
