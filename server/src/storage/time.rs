//! Time source abstraction for deterministic testing.
//!
//! This module provides a `TimeSource` trait that abstracts over time operations,
//! allowing the system to use real system time in production and simulated time
//! in tests. Token expiry, session expiry, task delays and leases all read the
//! clock through this trait.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeDelta, Utc};

/// Abstraction over time operations.
///
/// Implementations must be shareable across worker tasks.
pub trait TimeSource: Send + Sync {
    /// Get the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> i64;

    /// Get the current time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms()).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Real time source using system clock.
///
/// This is the default implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[allow(clippy::cast_possible_truncation)] // Milliseconds won't overflow i64 for millions of years
    fn now_ms(&self) -> i64 {
        // duration_since(UNIX_EPOCH) only fails if system time is before 1970.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis() as i64)
    }
}

/// A simulated time source for deterministic testing.
///
/// Time only advances when explicitly told to. Unlike the single-threaded
/// simulation clock this is backed by an atomic, so a processor running on a
/// tokio runtime can share it with the test driving it.
///
/// # Example
///
/// ```
/// use simple_bank::storage::time::{SimulatedTimeSource, TimeSource};
///
/// let time = SimulatedTimeSource::new(1000);
/// assert_eq!(time.now_ms(), 1000);
///
/// time.advance_ms(100);
/// assert_eq!(time.now_ms(), 1100);
/// ```
#[derive(Debug)]
pub struct SimulatedTimeSource {
    /// Current simulated time in milliseconds since Unix epoch.
    current_time_ms: AtomicI64,
}

impl SimulatedTimeSource {
    /// Create a new simulated time source with the given initial time.
    #[must_use]
    pub const fn new(initial_time_ms: i64) -> Self {
        Self {
            current_time_ms: AtomicI64::new(initial_time_ms),
        }
    }

    /// Create a new simulated time source starting at a reasonable default time.
    ///
    /// Uses `1_700_000_000_000` (approximately November 2023) as the starting point.
    #[must_use]
    pub const fn default_start() -> Self {
        Self::new(1_700_000_000_000)
    }

    /// Advance time by the given number of milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance time by a signed duration.
    pub fn advance(&self, delta: TimeDelta) {
        self.advance_ms(delta.num_milliseconds());
    }

    /// Set the current time to a specific value.
    pub fn set(&self, time_ms: i64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl TimeSource for SimulatedTimeSource {
    fn now_ms(&self) -> i64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedTimeSource {
    fn default() -> Self {
        Self::default_start()
    }
}
