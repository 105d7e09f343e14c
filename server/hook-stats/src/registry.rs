//! Concurrent per-application stats registry.
//!
//! Keys live in a sharded `DashMap`; each entry owns its counters as atomics
//! and its dedup token behind a per-entry lock. No operation takes a lock that
//! spans more than one application.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::token::{self, Verdict};
use crate::types::{AppRecord, CreateTime, DedupToken};

#[derive(Debug, Default)]
struct Slot {
  calls: AtomicU64,
  errors: AtomicU64,
  /// Also held (write) by `reset` and (read) by `copy` so a snapshot never
  /// sees a half-reset record.
  token: RwLock<DedupToken>,
}

impl Slot {
  fn copy(&self, name: &str) -> AppRecord {
    let token = self.token.read();
    AppRecord {
      name: name.to_string(),
      calls: self.calls.load(Ordering::Acquire),
      errors: self.errors.load(Ordering::Acquire),
      once: token.clone(),
    }
  }
}

/// Application name → stats record.
#[derive(Debug, Default)]
pub struct Registry {
  slots: DashMap<String, Arc<Slot>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with a zeroed record for every given app.
  pub fn seeded<I, S>(apps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let registry = Self::new();
    for app in apps {
      registry.slot(app.as_ref());
    }
    registry
  }

  fn slot(&self, app: &str) -> Arc<Slot> {
    if let Some(slot) = self.slots.get(app) {
      return Arc::clone(slot.value());
    }
    // `entry` holds the shard write lock, so only one insert can win.
    Arc::clone(self.slots.entry(app.to_string()).or_default().value())
  }

  /// Existing record for `app`, or a freshly inserted zeroed one.
  pub fn get_or_create(&self, app: &str) -> AppRecord {
    self.slot(app).copy(app)
  }

  /// Copy of the record if `app` has been seen.
  pub fn get(&self, app: &str) -> Option<AppRecord> {
    self.slots.get(app).map(|slot| slot.value().copy(app))
  }

  pub fn contains(&self, app: &str) -> bool {
    self.slots.contains_key(app)
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// Names of every known app, sorted.
  pub fn apps(&self) -> Vec<String> {
    let mut apps: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
    apps.sort();
    apps
  }

  pub fn add_calls(&self, app: &str, n: u64) -> u64 {
    self.slot(app).calls.fetch_add(n, Ordering::AcqRel) + n
  }

  pub fn add_errors(&self, app: &str, n: u64) -> u64 {
    self.slot(app).errors.fetch_add(n, Ordering::AcqRel) + n
  }

  /// Zero calls and errors; the dedup token is kept.
  pub fn reset(&self, app: &str) {
    let slot = self.slot(app);
    let _guard = slot.token.write();
    slot.calls.store(0, Ordering::Release);
    slot.errors.store(0, Ordering::Release);
  }

  pub fn set_token(&self, app: &str, sign: impl Into<String>, create_time: CreateTime) {
    let slot = self.slot(app);
    *slot.token.write() = DedupToken {
      sign: sign.into(),
      create_time,
    };
  }

  /// Compare a delivery against the saved token and, if it is accepted,
  /// store it as the new token in the same critical section.
  ///
  /// Two racing deliveries of the same payload therefore yield exactly one
  /// `Accept`.
  pub fn admit(&self, app: &str, sign: &str, create_time: &CreateTime) -> Verdict {
    let slot = self.slot(app);
    let mut saved = slot.token.write();
    let verdict = token::judge(&saved, sign, create_time);
    if verdict.is_accepted() {
      *saved = DedupToken {
        sign: sign.to_string(),
        create_time: create_time.clone(),
      };
    }
    verdict
  }

  /// Independent copy of every record, keyed and ordered by app name.
  pub fn snapshot(&self) -> BTreeMap<String, AppRecord> {
    self
      .slots
      .iter()
      .map(|entry| (entry.key().clone(), entry.value().copy(entry.key())))
      .collect()
  }

  /// Seed the registry from a snapshot, overwriting counters and tokens of
  /// the apps it names. Apps not in the snapshot are left untouched.
  pub fn restore(&self, records: BTreeMap<String, AppRecord>) {
    for (app, record) in records {
      let slot = self.slot(&app);
      let mut token = slot.token.write();
      slot.calls.store(record.calls, Ordering::Release);
      slot.errors.store(record.errors, Ordering::Release);
      *token = record.once;
    }
  }
}
