//! Application state for Axum handlers.

use studyhall_core::payment::ProviderToggles;
use studyhall_runtime::{BookingService, ReconciliationEngine, Recovery};

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Quotes, holds and payment orders
    pub bookings: BookingService,
    /// Callback and poll reconciliation
    pub engine: ReconciliationEngine,
    /// Operator recovery
    pub recovery: Recovery,
    /// Providers accepting new orders, snapshotted into each order request
    pub toggles: ProviderToggles,
    /// Upper bound for one reconcile-pending call
    pub recovery_limit: usize,
}

impl AppState {
    /// Default cap on transactions examined by one reconcile-pending call
    pub const DEFAULT_RECOVERY_LIMIT: usize = 500;

    /// State with all providers enabled and the default recovery limit.
    #[must_use]
    pub const fn new(bookings: BookingService, engine: ReconciliationEngine, recovery: Recovery) -> Self {
        Self {
            bookings,
            engine,
            recovery,
            toggles: ProviderToggles::ALL,
            recovery_limit: Self::DEFAULT_RECOVERY_LIMIT,
        }
    }

    /// Replace the provider toggles
    #[must_use]
    pub fn with_toggles(mut self, toggles: ProviderToggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Replace the reconcile-pending cap
    #[must_use]
    pub fn with_recovery_limit(mut self, limit: usize) -> Self {
        self.recovery_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }
}
