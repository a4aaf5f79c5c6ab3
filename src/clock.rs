//! Time source abstraction
//!
//! Dwell throttles and placeholder reveal/removal timers are deadlines
//! evaluated against an injected clock rather than real timers, so the
//! whole pipeline stays reproducible under test: a manual clock is
//! advanced explicitly and the element pump observes the new "now".

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// Source of the current instant.
///
/// Implementations must be `Send + Sync`; the loader consults the clock
/// from its completion path while the element pump consults it on the
/// caller's thread.
pub trait Clock: Send + Sync {
  /// Returns the current instant.
  fn now(&self) -> Instant;
}

// Allow Arc<dyn Clock> wherever a Clock is expected.
impl<T: Clock + ?Sized> Clock for Arc<T> {
  fn now(&self) -> Instant {
    (**self).now()
  }
}

/// Wall-clock time via `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Manually advanced clock for tests and deterministic tooling.
///
/// Starts at an arbitrary epoch and only moves when `advance` is called.
#[derive(Debug)]
pub struct ManualClock {
  epoch: Instant,
  elapsed: Mutex<Duration>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      epoch: Instant::now(),
      elapsed: Mutex::new(Duration::ZERO),
    }
  }

  /// Moves the clock forward by `step`.
  pub fn advance(&self, step: Duration) {
    let mut elapsed = self.elapsed.lock().unwrap();
    *elapsed += step;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.epoch + *self.elapsed.lock().unwrap()
  }
}
