//! Clock abstraction.
//!
//! Only `AggregateRoot::record` reads the clock, to stamp `recorded_at`.
//! Event application never does, so replay stays deterministic.

use chrono::{DateTime, Utc};

/// Source of event timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
