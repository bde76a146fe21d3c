//! Injected environment: time and booking-number generation.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use chrono::{DateTime, Utc};
/// use studyhall_core::environment::Clock;
///
/// struct FixedClock {
///     time: DateTime<Utc>,
/// }
///
/// impl Clock for FixedClock {
///     fn now(&self) -> DateTime<Utc> {
///         self.time
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces candidate human-readable booking numbers.
///
/// Uniqueness is enforced by the store; a generator only has to make collisions rare.
pub trait BookingNumberGenerator: Send + Sync {
    /// Next candidate for a booking created at `now`
    fn next(&self, now: DateTime<Utc>) -> String;
}

/// `BK-YYMMDD-XXXXXX` with six random characters from an unambiguous alphabet
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomBookingNumbers;

/// No `0/O` or `1/I`, so numbers survive being read over the phone.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

impl BookingNumberGenerator for RandomBookingNumbers {
    fn next(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        format!("BK-{}-{suffix}", now.format("%y%m%d"))
    }
}
