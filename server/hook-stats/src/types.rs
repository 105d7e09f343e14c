//! Core types for hook stats (webhook JSON contract + per-app records).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the registry notifier sends)
// ---------------------------------------------------------------------------

/// One webhook delivery from the container registry. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub occur_at: i64,
  #[serde(default)]
  pub operator: String,
  pub event_data: EventData,
}

/// The variable part of a delivery; this is what the dedup signature covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
  #[serde(default)]
  pub resources: Vec<Resource>,
  #[serde(default)]
  pub repository: Repository,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
  #[serde(default)]
  pub digest: String,
  #[serde(default)]
  pub tag: String,
  pub resource_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
  #[serde(default)]
  pub date_created: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub namespace: String,
  #[serde(default)]
  pub repo_full_name: String,
  #[serde(default)]
  pub repo_type: String,
}

// ---------------------------------------------------------------------------
// Dedup token
// ---------------------------------------------------------------------------

/// Fixed-width `YYYYMMDDHHMMSS` timestamp.
///
/// Ordering is plain string ordering, which equals chronological ordering
/// because every value is exactly 14 zero-padded digits. The empty value
/// (a never-seen app) sorts before every real timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateTime(String);

impl CreateTime {
  pub const FORMAT: &'static str = "%Y%m%d%H%M%S";
  pub const WIDTH: usize = 14;

  /// Accepts exactly 14 ASCII digits.
  pub fn parse(s: &str) -> Option<Self> {
    if s.len() == Self::WIDTH && s.bytes().all(|b| b.is_ascii_digit()) {
      Some(Self(s.to_string()))
    } else {
      None
    }
  }

  pub fn from_datetime(ts: &NaiveDateTime) -> Self {
    Self(ts.format(Self::FORMAT).to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CreateTime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Last accepted delivery for one app: payload signature + embedded create time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DedupToken {
  pub sign: String,
  pub create_time: CreateTime,
}

// ---------------------------------------------------------------------------
// Per-app record (snapshot contract)
// ---------------------------------------------------------------------------

/// Point-in-time copy of one registry entry.
///
/// Field names match the snapshot file: `{Name, Calls, Errors, Once:{Sign, CreateTime}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppRecord {
  pub name: String,
  pub calls: u64,
  pub errors: u64,
  #[serde(default)]
  pub once: DedupToken,
}

impl AppRecord {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      calls: 0,
      errors: 0,
      once: DedupToken::default(),
    }
  }
}
