//! # Studyhall Testing
//!
//! Testing utilities for the booking core.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clocks, booking numbers)
//! - [`InMemoryBookingStore`]: mutex-serialized store with the production predicate
//! - [`ScriptedGateway`]: payment provider with queued status outcomes
//! - Fixtures for resources, ranges and intents
//!
//! ## Example
//!
//! ```
//! use studyhall_testing::{InMemoryBookingStore, fixtures};
//!
//! let store = InMemoryBookingStore::new();
//! let seat = fixtures::seat(fixtures::weekly_table());
//! store.add_resource(seat.clone());
//! assert_eq!(store.write_calls(), 0);
//! ```

pub mod fixtures;
pub mod gateway;
pub mod store;

use chrono::{DateTime, Utc};
use studyhall_core::environment::{BookingNumberGenerator, Clock};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{BookingNumberGenerator, Clock, DateTime, Utc};
    use chrono::TimeDelta;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use studyhall_testing::mocks::FixedClock;
    /// use studyhall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2024-01-01 09:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens in practice.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2024-01-01 09:00:00 UTC
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Clock that only moves when told to
    ///
    /// ```
    /// use chrono::TimeDelta;
    /// use studyhall_core::environment::Clock;
    /// use studyhall_testing::mocks::ManualClock;
    ///
    /// let clock = ManualClock::starting_at_epoch();
    /// let before = clock.now();
    /// clock.advance(TimeDelta::minutes(10));
    /// assert_eq!(clock.now() - before, TimeDelta::minutes(10));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Clock at [`test_epoch`]
        #[must_use]
        pub fn starting_at_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move forward by `delta`
        pub fn advance(&self, delta: TimeDelta) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += delta;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Booking numbers from a script, then `BK-TEST-{n}` once it runs out
    ///
    /// Repeating a number in the script exercises collision retries.
    #[derive(Debug, Default)]
    pub struct SequenceBookingNumbers {
        scripted: Mutex<VecDeque<String>>,
        counter: AtomicU64,
    }

    impl SequenceBookingNumbers {
        /// Counter-only numbers
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Hand out `numbers` first
        #[must_use]
        pub fn scripted<I, S>(numbers: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                scripted: Mutex::new(numbers.into_iter().map(Into::into).collect()),
                counter: AtomicU64::new(0),
            }
        }
    }

    impl BookingNumberGenerator for SequenceBookingNumbers {
        fn next(&self, _now: DateTime<Utc>) -> String {
            let scripted = self
                .scripted
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            scripted.unwrap_or_else(|| {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("BK-TEST-{n:06}")
            })
        }
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call more than once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use gateway::ScriptedGateway;
pub use mocks::{FixedClock, ManualClock, SequenceBookingNumbers, test_clock, test_epoch};
pub use store::InMemoryBookingStore;
