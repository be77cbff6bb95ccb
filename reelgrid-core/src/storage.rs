//! Crash-safe per-worker storage: append logs and atomic snapshots.
//!
//! Files live flat under the storage path, named by the literal
//! concatenation of `file_key` and the optional secondary key (the
//! client id in practice). Callers must not let one file key be a
//! prefix of another.
//!
//! Append-log records are `len(3 BE) || json(entry)`; a torn tail is
//! truncated on load, so the decoded prefix is always a valid state.
//! Snapshots are written to a fresh temp file in the same directory and
//! renamed over the target, which is atomic under POSIX: a crash leaves
//! either the old content or the new, never a torn file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

const LENGTH_DATA_BYTES: usize = 3;

#[derive(Debug, Clone)]
pub struct StorageAdapter {
    root: PathBuf,
}

impl StorageAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, file_key: &str, secondary: Option<&str>) -> PathBuf {
        match secondary {
            Some(secondary) => self.root.join(format!("{file_key}{secondary}")),
            None => self.root.join(file_key),
        }
    }

    /// Append one record to the log `<file_key><secondary>`.
    pub fn append<T: Serialize>(
        &self,
        file_key: &str,
        secondary: Option<&str>,
        entry: &T,
    ) -> Result<()> {
        let path = self.file_path(file_key, secondary);
        let encoded = serde_json::to_vec(entry)?;
        if encoded.len() >= 1 << (8 * LENGTH_DATA_BYTES) {
            return Err(crate::error::CoreError::Internal(format!(
                "append entry of {} bytes too large",
                encoded.len()
            )));
        }
        let len = (encoded.len() as u32).to_be_bytes();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&len[1..])?;
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    }

    fn read_log_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset + LENGTH_DATA_BYTES <= raw.len() {
            let len = u32::from_be_bytes([
                0,
                raw[offset],
                raw[offset + 1],
                raw[offset + 2],
            ]) as usize;
            offset += LENGTH_DATA_BYTES;
            if offset + len > raw.len() {
                warn!(path = %path.display(), "truncating torn append-log tail");
                break;
            }
            match serde_json::from_slice(&raw[offset..offset + len]) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed append-log record");
                }
            }
            offset += len;
        }
        if offset < raw.len() && offset + LENGTH_DATA_BYTES > raw.len() {
            warn!(path = %path.display(), "truncating torn append-log length prefix");
        }
        Ok(entries)
    }

    /// Load one append log; missing file is an empty log.
    pub fn load_log<T: DeserializeOwned>(
        &self,
        file_key: &str,
        secondary: Option<&str>,
    ) -> Result<Vec<T>> {
        let path = self.file_path(file_key, secondary);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::read_log_file(&path)
    }

    /// Load every append log sharing `file_key`, keyed by secondary key.
    pub fn load_logs<T: DeserializeOwned>(
        &self,
        file_key: &str,
    ) -> Result<HashMap<String, Vec<T>>> {
        let mut out = HashMap::new();
        for (name, path) in self.files_with_prefix(file_key)? {
            let secondary = name[file_key.len()..].to_string();
            if secondary.is_empty() {
                continue;
            }
            out.insert(secondary, Self::read_log_file(&path)?);
        }
        Ok(out)
    }

    /// Replace the snapshot `<file_key><secondary>` atomically.
    pub fn update<T: Serialize>(
        &self,
        file_key: &str,
        secondary: Option<&str>,
        data: &T,
    ) -> Result<()> {
        let path = self.file_path(file_key, secondary);
        let temp_path = self.root.join(Uuid::new_v4().to_string());
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&serde_json::to_vec(data)?)?;
            temp.flush()?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        debug!(path = %path.display(), "snapshot replaced");
        Ok(())
    }

    /// Load one snapshot; missing, empty or malformed files read as
    /// absent (in-memory state stays authoritative).
    pub fn load<T: DeserializeOwned>(
        &self,
        file_key: &str,
        secondary: Option<&str>,
    ) -> Result<Option<T>> {
        let path = self.file_path(file_key, secondary);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        if raw.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice(&raw) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed snapshot");
                Ok(None)
            }
        }
    }

    /// Load every snapshot sharing `file_key`, keyed by secondary key.
    pub fn load_all<T: DeserializeOwned>(&self, file_key: &str) -> Result<HashMap<String, T>> {
        let mut out = HashMap::new();
        for (name, path) in self.files_with_prefix(file_key)? {
            let secondary = name[file_key.len()..].to_string();
            if secondary.is_empty() {
                continue;
            }
            let raw = fs::read(&path)?;
            if raw.is_empty() {
                continue;
            }
            match serde_json::from_slice(&raw) {
                Ok(data) => {
                    out.insert(secondary, data);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring malformed snapshot");
                }
            }
        }
        Ok(out)
    }

    /// Idempotent: deleting a missing file succeeds.
    pub fn delete(&self, file_key: &str, secondary: Option<&str>) -> Result<()> {
        let path = self.file_path(file_key, secondary);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn files_with_prefix(&self, file_key: &str) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(file_key) {
                out.push((name, entry.path()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn adapter() -> (tempfile::TempDir, StorageAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageAdapter::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn append_log_round_trips() {
        let (_dir, storage) = adapter();
        storage.append("movies", Some("c1"), &(1i64, "A".to_string())).unwrap();
        storage.append("movies", Some("c1"), &(2i64, "B".to_string())).unwrap();
        let entries: Vec<(i64, String)> = storage.load_log("movies", Some("c1")).unwrap();
        assert_eq!(entries, vec![(1, "A".to_string()), (2, "B".to_string())]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let (dir, storage) = adapter();
        storage.append("log", None, &"complete".to_string()).unwrap();
        storage.append("log", None, &"gone".to_string()).unwrap();
        let path = dir.path().join("log");
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() - 3]).unwrap();
        let entries: Vec<String> = storage.load_log("log", None).unwrap();
        assert_eq!(entries, vec!["complete".to_string()]);
    }

    #[test]
    fn snapshot_replace_round_trips() {
        let (_dir, storage) = adapter();
        let mut set = HashSet::new();
        set.insert("client-1".to_string());
        storage.update("connected_clients", None, &set).unwrap();
        let loaded: Option<HashSet<String>> = storage.load("connected_clients", None).unwrap();
        assert_eq!(loaded, Some(set));
    }

    #[test]
    fn snapshot_replace_leaves_no_temp_files() {
        let (dir, storage) = adapter();
        storage.update("state", Some("c1"), &42u32).unwrap();
        storage.update("state", Some("c1"), &43u32).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["statec1".to_string()]);
        let loaded: Option<u32> = storage.load("state", Some("c1")).unwrap();
        assert_eq!(loaded, Some(43));
    }

    #[test]
    fn malformed_snapshot_reads_as_absent() {
        let (dir, storage) = adapter();
        fs::write(dir.path().join("state"), b"{not json").unwrap();
        let loaded: Option<u32> = storage.load("state", None).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn load_all_maps_by_secondary_key() {
        let (_dir, storage) = adapter();
        storage.update("state", Some("c1"), &1u32).unwrap();
        storage.update("state", Some("c2"), &2u32).unwrap();
        let all: HashMap<String, u32> = storage.load_all("state").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["c1"], 1);
        assert_eq!(all["c2"], 2);
    }

    #[test]
    fn missing_data_reads_as_empty() {
        let (_dir, storage) = adapter();
        let log: Vec<String> = storage.load_log("nothing", None).unwrap();
        assert!(log.is_empty());
        let snap: Option<u32> = storage.load("nothing", None).unwrap();
        assert!(snap.is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, storage) = adapter();
        storage.update("state", Some("c1"), &1u32).unwrap();
        storage.delete("state", Some("c1")).unwrap();
        storage.delete("state", Some("c1")).unwrap();
        let loaded: Option<u32> = storage.load("state", Some("c1")).unwrap();
        assert!(loaded.is_none());
    }
}
