//! # Studyhall Core
//!
//! Domain types and seams for booking study-hall seats and cabins and reconciling
//! their payments.
//!
//! This crate is I/O free. It defines:
//!
//! - **Types**: resources, reservations, transactions and the booking intent
//! - **Pricing**: the cheapest-tier quote for a date range
//! - **Availability**: the single conflict predicate shared by every write path
//! - **Stores**: storage seams implemented by `studyhall-postgres` and
//!   `studyhall-testing`
//! - **Payments**: the provider-agnostic `PaymentGateway` seam and `PaymentOutcome`
//! - **Environment**: injected clock and booking-number generator
//!
//! ## Flow
//!
//! ```text
//! quote ──► create booking ──► create payment order ──► callback / poll
//!                 │                                           │
//!                 ▼                                           ▼
//!         Reservation Writer ◄──────────────────── Reconciliation Engine
//!       (resource row lock)                        (transaction row lock)
//! ```
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use studyhall_core::pricing::{quote, PriceTable, PricingTier};
//! use studyhall_core::types::{DateRange, Money};
//!
//! let range = DateRange::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
//!     NaiveDate::from_ymd_opt(2024, 1, 7).unwrap_or_default(),
//! )?;
//! let table = PriceTable::new()
//!     .with_daily(Money::from_rupees(100))
//!     .with_weekly(Money::from_rupees(500));
//!
//! let quote = quote(range, &table)?;
//! assert_eq!(quote.tier, PricingTier::Weekly);
//! assert_eq!(quote.amount, Money::from_rupees(500));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod availability;
pub mod environment;
pub mod error;
pub mod payment;
pub mod pricing;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{BookingError, StoreError};
pub use payment::{PaymentGateway, PaymentOutcome};
pub use pricing::{PriceTable, PricingError, PricingTier, Quote};
pub use store::BookingStore;
pub use types::*;

/// Boxed, sendable future returned by the dyn-compatible seams in this crate.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
