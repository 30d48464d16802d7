//! Wall-clock source for TTLs, rate windows and the daily usage rollover.
//!
//! All timestamps are milliseconds since the Unix epoch. [`SystemClock`]
//! computes day boundaries in the device's local timezone; [`ManualClock`]
//! is fully controllable and uses UTC day boundaries so tests are stable on
//! any host.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{Local, TimeZone};

const DAY_MS: i64 = 86_400_000;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Start of the calendar day containing `at_millis`.
    fn local_midnight(&self, at_millis: i64) -> i64;
}

/// Real time, local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn local_midnight(&self, at_millis: i64) -> i64 {
        let Some(at) = Local.timestamp_millis_opt(at_millis).single() else {
            return at_millis - at_millis.rem_euclid(DAY_MS);
        };
        let Some(naive_midnight) = at.date_naive().and_hms_opt(0, 0, 0) else {
            return at_millis;
        };
        // DST transitions can make local midnight ambiguous or nonexistent.
        Local
            .from_local_datetime(&naive_midnight)
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(at_millis)
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn local_midnight(&self, at_millis: i64) -> i64 {
        at_millis - at_millis.rem_euclid(DAY_MS)
    }
}
