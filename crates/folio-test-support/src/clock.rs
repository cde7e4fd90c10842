//! Deterministic `Clock` for tests.

use chrono::{DateTime, TimeZone, Utc};
use folio_core::clock::Clock;

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Noon UTC on 2024-01-15.
    #[must_use]
    pub fn noon() -> Self {
        Self(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
