//! Wall-clock access for the scheduler and ingress.
//!
//! Everything that waits for a time of day goes through [`Clock`] so tests can
//! drive day boundaries with [`ManualClock`] instead of sleeping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::watch;

#[async_trait]
pub trait Clock: Send + Sync {
  /// Current local wall-clock time.
  fn now(&self) -> NaiveDateTime;

  async fn sleep(&self, duration: Duration);

  /// Suspend until `deadline`; returns at once if it has already passed.
  async fn sleep_until(&self, deadline: NaiveDateTime) {
    let wait = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
    self.sleep(wait).await;
  }

  fn today(&self) -> NaiveDate {
    self.now().date()
  }
}

/// First instant of the day after `now`.
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
  let tomorrow = now.date().succ_opt().unwrap_or(NaiveDate::MAX);
  tomorrow.and_time(NaiveTime::MIN)
}

/// Human-friendly `"Xh Ym"` for log lines about long waits.
pub fn describe_wait(from: NaiveDateTime, to: NaiveDateTime) -> String {
  let minutes = (to - from).num_minutes().max(0);
  format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Local time, real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
  fn now(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }

  async fn sleep(&self, duration: Duration) {
    tokio::time::sleep(duration).await;
  }
}

/// Settable clock for tests.
///
/// By default sleeping advances the stored time and returns at once. A
/// [`ManualClock::stepped`] clock never moves on its own: sleepers wait until
/// `set`/`advance` carries the time past their deadline.
#[derive(Debug)]
pub struct ManualClock {
  now: watch::Sender<NaiveDateTime>,
  stepped: bool,
}

impl ManualClock {
  pub fn new(start: NaiveDateTime) -> Self {
    Self {
      now: watch::Sender::new(start),
      stepped: false,
    }
  }

  pub fn stepped(start: NaiveDateTime) -> Self {
    Self {
      now: watch::Sender::new(start),
      stepped: true,
    }
  }

  pub fn set(&self, now: NaiveDateTime) {
    self.now.send_replace(now);
  }

  pub fn advance(&self, by: Duration) {
    let Ok(by) = TimeDelta::from_std(by) else {
      return;
    };
    self.now.send_if_modified(|now| match now.checked_add_signed(by) {
      Some(next) => {
        *now = next;
        true
      }
      None => false,
    });
  }

  /// Tasks currently parked in `sleep` on a stepped clock.
  pub fn sleepers(&self) -> usize {
    self.now.receiver_count()
  }
}

#[async_trait]
impl Clock for ManualClock {
  fn now(&self) -> NaiveDateTime {
    *self.now.borrow()
  }

  async fn sleep(&self, duration: Duration) {
    if !self.stepped || duration.is_zero() {
      self.advance(duration);
      tokio::task::yield_now().await;
      return;
    }
    let deadline = TimeDelta::from_std(duration)
      .ok()
      .and_then(|d| self.now().checked_add_signed(d));
    let mut rx = self.now.subscribe();
    let _ = rx
      .wait_for(|now| deadline.is_some_and(|deadline| *now >= deadline))
      .await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, d)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  #[test]
  fn next_midnight_is_start_of_tomorrow() {
    assert_eq!(next_midnight(at(1, 13, 45)), at(2, 0, 0));
    assert_eq!(next_midnight(at(1, 0, 0)), at(2, 0, 0));
  }

  #[test]
  fn next_midnight_crosses_month() {
    let end = NaiveDate::from_ymd_opt(2025, 1, 31)
      .unwrap()
      .and_hms_opt(23, 59, 59)
      .unwrap();
    let expected = NaiveDate::from_ymd_opt(2025, 2, 1)
      .unwrap()
      .and_time(NaiveTime::MIN);
    assert_eq!(next_midnight(end), expected);
  }

  #[test]
  fn describe_wait_formats_hours_and_minutes() {
    assert_eq!(describe_wait(at(1, 9, 15), at(1, 18, 0)), "8h 45m");
    assert_eq!(describe_wait(at(1, 9, 0), at(1, 8, 0)), "0h 0m");
  }

  #[tokio::test]
  async fn manual_clock_sleep_until_jumps() {
    let clock = ManualClock::new(at(1, 8, 0));
    clock.sleep_until(at(1, 12, 30)).await;
    assert_eq!(clock.now(), at(1, 12, 30));

    // A deadline in the past does not move time backwards.
    clock.sleep_until(at(1, 9, 0)).await;
    assert_eq!(clock.now(), at(1, 12, 30));
  }

  #[tokio::test]
  async fn stepped_clock_waits_for_the_test() {
    let clock = std::sync::Arc::new(ManualClock::stepped(at(1, 8, 0)));
    let sleeper = {
      let clock = clock.clone();
      tokio::spawn(async move { clock.sleep_until(at(1, 9, 0)).await })
    };
    while clock.sleepers() == 0 {
      tokio::task::yield_now().await;
    }

    clock.set(at(1, 8, 30));
    tokio::task::yield_now().await;
    assert!(!sleeper.is_finished());

    clock.advance(Duration::from_secs(30 * 60));
    sleeper.await.unwrap();
    assert_eq!(clock.now(), at(1, 9, 0));
    assert_eq!(clock.sleepers(), 0);
  }

  #[tokio::test]
  async fn manual_clock_sleep_advances() {
    let clock = ManualClock::new(at(1, 23, 59));
    clock.sleep(Duration::from_secs(60)).await;
    assert_eq!(clock.now(), at(2, 0, 0));
    assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
  }
}
