//! Structured error types for hook stats persistence.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("snapshot io: {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("snapshot json: {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

impl SnapshotError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
    Self::Json {
      path: path.into(),
      source,
    }
  }
}
