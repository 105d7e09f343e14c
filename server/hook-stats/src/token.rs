//! Dedup token comparison: is an inbound delivery new, stale, or a duplicate?

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::types::{CreateTime, DedupToken, EventData};

/// Outcome of comparing a delivery against the saved token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
  /// Same signature as the last accepted delivery.
  Duplicate,
  /// Different signature but not newer than the last accepted delivery.
  Stale,
  /// Different signature and strictly newer: becomes the new token.
  Accept,
}

impl Verdict {
  pub fn is_accepted(self) -> bool {
    self == Verdict::Accept
  }
}

/// Compute the canonical signature of a delivery's event data.
///
/// Covers every resource (digest, tag, locator) and the repository
/// descriptor, in payload order. Envelope fields (`type`, `occur_at`,
/// `operator`) are left out since retries may restamp them.
/// Uses blake3 for a fast, deterministic hash.
pub fn sign(event: &EventData) -> String {
  let mut hasher = blake3::Hasher::new();
  for resource in &event.resources {
    hasher.update(b"resource|");
    hasher.update(resource.digest.as_bytes());
    hasher.update(b"|");
    hasher.update(resource.tag.as_bytes());
    hasher.update(b"|");
    hasher.update(resource.resource_url.as_bytes());
    hasher.update(b"\n");
  }

  let repo = &event.repository;
  hasher.update(b"repository|");
  hasher.update(repo.namespace.as_bytes());
  hasher.update(b"|");
  hasher.update(repo.name.as_bytes());
  hasher.update(b"|");
  hasher.update(repo.repo_full_name.as_bytes());
  hasher.update(b"|");
  hasher.update(repo.repo_type.as_bytes());
  hasher.update(b"|");
  hasher.update(&repo.date_created.to_le_bytes());

  hasher.finalize().to_hex().to_string()
}

/// Extract the create time embedded in a tag: the 14 digits after the last `_`.
///
/// Falls back to `now` when the tag has no underscore or the suffix is not a
/// 14-digit timestamp.
pub fn create_time_from_tag(tag: &str, now: &NaiveDateTime) -> CreateTime {
  tag
    .rsplit_once('_')
    .and_then(|(_, suffix)| CreateTime::parse(suffix))
    .unwrap_or_else(|| CreateTime::from_datetime(now))
}

/// Decide what to do with a delivery given the saved token.
pub fn judge(saved: &DedupToken, sign: &str, create_time: &CreateTime) -> Verdict {
  if saved.sign == sign {
    Verdict::Duplicate
  } else if *create_time > saved.create_time {
    Verdict::Accept
  } else {
    Verdict::Stale
  }
}
