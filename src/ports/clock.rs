//! Clock Port - Injectable Wall-Clock Time
//!
//! Trigger intervals, sample timestamps and derived-instrument timestamps
//! all read time through this trait so tests can drive time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of wall-clock time in Unix seconds.
pub trait Clock: Send + Sync {
  fn now(&self) -> i64;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> i64 {
    Utc::now().timestamp()
  }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start: i64) -> Self {
    Self {
      now: AtomicI64::new(start),
    }
  }

  pub fn set(&self, now: i64) {
    self.now.store(now, Ordering::SeqCst);
  }

  pub fn advance(&self, secs: i64) {
    self.now.fetch_add(secs, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}
