//! Snapshot persistence: the registry as one JSON object on disk.
//!
//! File format: `{"<app>": {"Name", "Calls", "Errors", "Once": {"Sign", "CreateTime"}}}`.
//!
//! Writes go to `<file>.tmp`, are fsynced, then renamed over the snapshot and
//! the parent directory is fsynced, so a crash leaves either the previous or
//! the new snapshot, never a partial one. Each flush overwrites the file.
//! Writers sharing a store (or any of its clones) are serialized, so
//! concurrent flushes land one after another and the last one wins.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SnapshotError;
use crate::registry::Registry;
use crate::types::AppRecord;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Reads and writes the registry snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
  path: PathBuf,
  /// Guards the shared `<file>.tmp` between write and rename.
  write_lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the snapshot. A missing file is `Ok(None)`, not an error.
  pub fn load(&self) -> Result<Option<BTreeMap<String, AppRecord>>> {
    let bytes = match fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(SnapshotError::io(&self.path, e)),
    };
    let records = serde_json::from_slice(&bytes).map_err(|e| SnapshotError::json(&self.path, e))?;
    Ok(Some(records))
  }

  /// Atomically replace the snapshot with `records`.
  pub fn save(&self, records: &BTreeMap<String, AppRecord>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(records).map_err(|e| SnapshotError::json(&self.path, e))?;
    let _writing = self.write_lock.lock();
    self
      .write_atomic(&bytes)
      .map_err(|e| SnapshotError::io(&self.path, e))?;
    debug!(path = %self.path.display(), apps = records.len(), "snapshot written");
    Ok(())
  }

  /// Copy the registry and write it out.
  pub fn flush(&self, registry: &Registry) -> Result<()> {
    self.save(&registry.snapshot())
  }

  /// Load the snapshot (if any) into the registry. Returns the number of
  /// restored apps.
  pub fn restore_into(&self, registry: &Registry) -> Result<usize> {
    match self.load()? {
      Some(records) => {
        let n = records.len();
        registry.restore(records);
        Ok(n)
      }
      None => Ok(0),
    }
  }

  fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
    let parent = self
      .path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf);
    if let Some(dir) = &parent {
      fs::create_dir_all(dir)?;
    }

    let mut tmp_name = self.path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
      let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
      file.write_all(bytes)?;
      file.sync_all()?;
    }

    fs::rename(&tmp_path, &self.path)?;

    // Make the rename itself durable.
    let dir = parent.unwrap_or_else(|| PathBuf::from("."));
    File::open(&dir)?.sync_all()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::CreateTime;
  use tempfile::tempdir;

  #[test]
  fn missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("stats.json"));
    assert!(store.load().unwrap().is_none());

    let registry = Registry::seeded(["api"]);
    assert_eq!(store.restore_into(&registry).unwrap(), 0);
    assert_eq!(registry.get("api").unwrap().calls, 0);
  }

  #[test]
  fn save_then_load_preserves_records() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("stats.json"));

    let registry = Registry::new();
    registry.add_calls("x", 5);
    registry.add_errors("x", 2);
    registry.set_token("x", "sigA", CreateTime::parse("20250101000000").unwrap());
    store.flush(&registry).unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded, registry.snapshot());
  }

  #[test]
  fn save_overwrites_previous_snapshot() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("stats.json"));

    let registry = Registry::new();
    registry.add_calls("x", 1);
    store.flush(&registry).unwrap();
    registry.reset("x");
    store.flush(&registry).unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded["x"].calls, 0);
    assert!(!dir.path().join("stats.json.tmp").exists());
  }

  #[test]
  fn concurrent_flushes_all_succeed_and_last_wins() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("stats.json"));

    let big = std::sync::Arc::new(Registry::new());
    for i in 0..2000 {
      big.add_calls(&format!("app-{i:04}"), 1);
    }
    let small = std::sync::Arc::new(Registry::seeded(["api"]));

    let writers: Vec<_> = [big.clone(), small.clone()]
      .into_iter()
      .map(|registry| {
        let store = store.clone();
        std::thread::spawn(move || {
          for _ in 0..200 {
            store.flush(&registry).unwrap();
          }
        })
      })
      .collect();
    for writer in writers {
      writer.join().unwrap();
    }

    let loaded = store.load().unwrap().unwrap();
    assert!(loaded == big.snapshot() || loaded == small.snapshot());
    assert!(!dir.path().join("stats.json.tmp").exists());

    // A final flush after the race always sticks.
    store.flush(&small).unwrap();
    assert_eq!(store.load().unwrap().unwrap(), small.snapshot());
  }

  #[test]
  fn creates_missing_parent_directory() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("state").join("stats.json"));
    store.flush(&Registry::seeded(["api"])).unwrap();
    assert!(store.path().exists());
  }

  #[test]
  fn reads_legacy_file_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(
      &path,
      r#"{"web":{"Name":"web","Calls":3,"Errors":1,"Once":{"Sign":"{}","CreateTime":"20060101000000"}}}"#,
    )
    .unwrap();

    let records = SnapshotStore::new(&path).load().unwrap().unwrap();
    assert_eq!(records["web"].calls, 3);
    assert_eq!(records["web"].errors, 1);
    assert_eq!(records["web"].once.create_time.as_str(), "20060101000000");
  }

  #[test]
  fn corrupt_file_is_json_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(&path, b"{not json").unwrap();
    let err = SnapshotStore::new(&path).load().unwrap_err();
    assert!(matches!(err, SnapshotError::Json { .. }));
  }
}
