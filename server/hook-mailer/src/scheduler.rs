//! Background loops: midnight reset, scheduled informers, periodic snapshot.
//!
//! All waiting goes through the injected [`Clock`], so every loop body is
//! testable with a manual clock.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeZone, Utc};
use rand::Rng;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use hook_stats::{Registry, SnapshotStore};

use crate::clock::{describe_wait, next_midnight, Clock};
use crate::config::{ConfigError, HookConfig};
use crate::error::ScheduleError;
use crate::notify::{Alert, Notifier};

/// When the loops fire.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
  /// Sorted times of day for the exact-time informer.
  pub inform_times: Vec<NaiveTime>,
  pub inform_cron: Option<String>,
  pub snapshot_interval: Duration,
  /// Upper bound of the per-app random delay inside an informer pass.
  pub jitter: Duration,
  pub notify_success: bool,
}

impl SchedulePlan {
  pub fn from_config(hook: &HookConfig) -> Result<Self, ConfigError> {
    Ok(Self {
      inform_times: hook.audit.inform_times()?,
      inform_cron: hook.audit.cron_expr().map(str::to_string),
      snapshot_interval: hook.snapshot_interval(),
      jitter: hook.audit.jitter(),
      notify_success: hook.audit.notify_success,
    })
  }
}

/// Parsed cron schedule, evaluated on local wall time.
#[derive(Debug, Clone)]
pub struct CronTrigger {
  schedule: cron::Schedule,
}

impl CronTrigger {
  pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
    cron::Schedule::from_str(expr)
      .map(|schedule| Self { schedule })
      .map_err(|e| ScheduleError::Cron {
        expr: expr.to_string(),
        reason: e.to_string(),
      })
  }

  /// First fire time strictly after `now`.
  pub fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
    // Local wall time is fed through as if it were UTC so the schedule
    // matches the wall clock without DST arithmetic.
    self
      .schedule
      .after(&Utc.from_utc_datetime(&now))
      .next()
      .map(|t| t.naive_utc())
  }
}

/// Tally of one informer pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
  pub sent: usize,
  pub silent: usize,
  pub failed: usize,
}

enum Outcome {
  Sent,
  Silent,
  Failed,
}

#[derive(Clone)]
pub struct Scheduler {
  registry: Arc<Registry>,
  notifier: Arc<Notifier>,
  store: Arc<SnapshotStore>,
  clock: Arc<dyn Clock>,
  plan: Arc<SchedulePlan>,
}

impl Scheduler {
  pub fn new(
    registry: Arc<Registry>,
    notifier: Arc<Notifier>,
    store: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
    plan: SchedulePlan,
  ) -> Self {
    Self {
      registry,
      notifier,
      store,
      clock,
      plan: Arc::new(plan),
    }
  }

  /// Start all four loops on the runtime.
  pub fn spawn(self) -> Vec<JoinHandle<()>> {
    vec![
      tokio::spawn(self.clone().run_daily_reset()),
      tokio::spawn(self.clone().run_exact_times()),
      tokio::spawn(self.clone().run_cron()),
      tokio::spawn(self.run_snapshots()),
    ]
  }

  // -------------------------------------------------------------------------
  // Daily reset
  // -------------------------------------------------------------------------

  pub async fn run_daily_reset(self) {
    let mut midnight = next_midnight(self.clock.now());
    loop {
      info!(wait = %describe_wait(self.clock.now(), midnight), "next stats reset scheduled");
      self.clock.sleep_until(midnight).await;
      self.reset_all().await;
      midnight = next_midnight(midnight.max(self.clock.now()));
    }
  }

  /// Zero every app's counters concurrently, then write one snapshot.
  pub async fn reset_all(&self) {
    let mut tasks = JoinSet::new();
    for app in self.registry.apps() {
      let registry = Arc::clone(&self.registry);
      tasks.spawn(async move {
        registry.reset(&app);
        debug!(app = %app, "stats reset");
      });
    }
    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "stats reset task failed");
      }
    }
    info!(apps = self.registry.len(), "daily stats reset");
    self.flush().await;
  }

  // -------------------------------------------------------------------------
  // Informers
  // -------------------------------------------------------------------------

  /// Check every app's counters and send whatever alert they call for.
  /// A failed mail is logged and does not stop the pass.
  pub async fn inform_pass(&self) -> PassReport {
    let apps = self.registry.apps();
    let delays: Vec<Duration> = {
      let mut rng = rand::rng();
      apps
        .iter()
        .map(|_| jitter_delay(&mut rng, self.plan.jitter))
        .collect()
    };

    let mut tasks = JoinSet::new();
    for (app, delay) in apps.into_iter().zip(delays) {
      let this = self.clone();
      tasks.spawn(async move {
        this.clock.sleep(delay).await;
        let record = this.registry.get_or_create(&app);
        let Some(alert) = Alert::for_record(&record, this.plan.notify_success) else {
          debug!(app = %app, calls = record.calls, "no alert needed");
          return Outcome::Silent;
        };
        match this.notifier.alert(alert, &app, this.clock.today()).await {
          Ok(()) => {
            info!(app = %app, ?alert, calls = record.calls, errors = record.errors, "alert sent");
            Outcome::Sent
          }
          Err(e) => {
            warn!(app = %app, ?alert, error = %e, "alert mail failed");
            Outcome::Failed
          }
        }
      });
    }

    let mut report = PassReport::default();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(Outcome::Sent) => report.sent += 1,
        Ok(Outcome::Silent) => report.silent += 1,
        Ok(Outcome::Failed) => report.failed += 1,
        Err(e) => {
          error!(error = %e, "informer task failed");
          report.failed += 1;
        }
      }
    }
    info!(sent = report.sent, silent = report.silent, failed = report.failed, "informer pass done");
    report
  }

  pub async fn run_exact_times(self) {
    if self.plan.inform_times.is_empty() {
      debug!("no inform times configured, exact-time informer idle");
      return;
    }
    loop {
      let fired = self.exact_time_day().await;
      let now = self.clock.now();
      let midnight = next_midnight(now);
      info!(fired, wait = %describe_wait(now, midnight), "exact-time informer done for today");
      self.clock.sleep_until(midnight).await;
    }
  }

  /// Walk today's inform times. Future slots are waited for and fired;
  /// elapsed ones are skipped, except that an elapsed last slot fires once
  /// when nothing else fired today. Returns the number of passes.
  pub async fn exact_time_day(&self) -> usize {
    let today = self.clock.today();
    let times = &self.plan.inform_times;
    let mut fired = 0;
    for (i, time) in times.iter().enumerate() {
      let slot = today.and_time(*time);
      let now = self.clock.now();
      if now <= slot {
        info!(at = %slot, wait = %describe_wait(now, slot), "waiting for inform time");
        self.clock.sleep_until(slot).await;
        self.inform_pass().await;
        fired += 1;
      } else if i + 1 == times.len() && fired == 0 {
        info!(at = %slot, "last inform time already passed, informing now");
        self.inform_pass().await;
        fired += 1;
      } else {
        debug!(at = %slot, "inform time already passed, skipped");
      }
    }
    fired
  }

  pub async fn run_cron(self) {
    let Some(expr) = self.plan.inform_cron.clone() else {
      debug!("no inform cron configured, cron informer idle");
      return;
    };
    let trigger = match CronTrigger::parse(&expr) {
      Ok(trigger) => trigger,
      Err(e) => {
        error!(error = %e, "cron informer disabled");
        return;
      }
    };
    info!(cron = %expr, "cron informer started");
    self.run_cron_until(&trigger, None).await;
  }

  /// Fire an informer pass at every cron tick up to `until` (forever when
  /// `None`). Returns the number of passes.
  pub async fn run_cron_until(&self, trigger: &CronTrigger, until: Option<NaiveDateTime>) -> usize {
    let mut last: Option<NaiveDateTime> = None;
    let mut fired = 0;
    loop {
      let now = self.clock.now();
      let from = last.map_or(now, |last| last.max(now));
      let Some(next) = trigger.next_after(from) else {
        warn!("cron schedule has no further fire times");
        return fired;
      };
      if until.is_some_and(|until| next > until) {
        return fired;
      }
      debug!(at = %next, wait = %describe_wait(now, next), "next cron inform");
      self.clock.sleep_until(next).await;
      self.inform_pass().await;
      last = Some(next);
      fired += 1;
    }
  }

  // -------------------------------------------------------------------------
  // Snapshot
  // -------------------------------------------------------------------------

  pub async fn run_snapshots(self) {
    loop {
      self.clock.sleep(self.plan.snapshot_interval).await;
      self.flush().await;
    }
  }

  /// Write the registry to the snapshot file on the blocking pool; failures
  /// are logged.
  pub async fn flush(&self) -> bool {
    let store = Arc::clone(&self.store);
    let registry = Arc::clone(&self.registry);
    match tokio::task::spawn_blocking(move || store.flush(&registry)).await {
      Ok(Ok(())) => {
        debug!(path = %self.store.path().display(), "stats snapshot written");
        true
      }
      Ok(Err(e)) => {
        error!(error = %e, "stats snapshot failed");
        false
      }
      Err(e) => {
        error!(error = %e, "stats snapshot task failed");
        false
      }
    }
  }
}

fn jitter_delay(rng: &mut impl Rng, max: Duration) -> Duration {
  let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
  if max_ms == 0 {
    return Duration::ZERO;
  }
  Duration::from_millis(rng.random_range(0..=max_ms))
}
