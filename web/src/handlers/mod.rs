//! HTTP request handlers, one module per area.

pub mod admin;
pub mod bookings;
pub mod health;
pub mod payments;
pub mod quotes;
pub mod transactions;

pub use health::health_check;
