//! Payment gateway seam.
//!
//! Providers are unified behind [`PaymentGateway`], which only ever *reports* an outcome.
//! Creating or linking reservations is the reconciliation engine's job, so the same
//! linking logic runs whether the outcome arrived by callback or by poll.

use crate::BoxFuture;
use crate::types::{BookingIntent, Money, PaymentMethod, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Well-known failure reasons recorded on transactions.
pub mod reasons {
    /// Callback signature did not verify
    pub const SIGNATURE_MISMATCH: &str = "signature_mismatch";
    /// Callback order id does not belong to the transaction
    pub const ORDER_MISMATCH: &str = "order_mismatch";
    /// Provider has no inbound callback
    pub const CALLBACK_NOT_SUPPORTED: &str = "callback_not_supported";
    /// Payment succeeded but the dates were taken in the meantime
    pub const RESOURCE_NO_LONGER_AVAILABLE: &str = "resource_no_longer_available";
}

/// Provider verdict for one order. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money captured
    Success {
        /// Provider's payment id
        provider_payment_id: String,
        /// Raw provider evidence
        raw: serde_json::Value,
    },
    /// Definitely not paid
    Failure {
        /// Provider reason, recorded verbatim
        reason: String,
    },
    /// Not known yet
    StillPending,
}

impl PaymentOutcome {
    /// Shorthand for a failure with a static reason
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Label used in logs and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::StillPending => "still_pending",
        }
    }
}

/// Provider reference returned by order creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    /// Provider order id
    pub provider_order_id: String,
    /// Public key id or QR payload handed to the client
    pub provider_public_key: String,
    /// Raw order response
    pub raw: serde_json::Value,
}

/// Inbound callback body from the signed-callback provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Provider order id
    pub order_id: String,
    /// Provider payment id
    pub payment_id: String,
    /// Hex HMAC-SHA256 over `order_id|payment_id`
    pub signature: String,
}

/// Errors talking to a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The request did not finish in time
    #[error("Gateway request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a non-success status
    #[error("Provider returned {status}: {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Provider message
        message: String,
    },

    /// Credentials were refused
    #[error("Provider rejected credentials")]
    Unauthorized,

    /// Response body could not be understood
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The provider is not configured in this process
    #[error("Payment method {0} is not configured")]
    NotConfigured(PaymentMethod),

    /// The provider is configured but not accepting new orders
    #[error("Payment method {0} is disabled")]
    Disabled(PaymentMethod),
}

impl GatewayError {
    /// Timeouts, network errors, throttling and 5xx may succeed on retry
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized | Self::InvalidResponse(_) | Self::NotConfigured(_) | Self::Disabled(_) => false,
        }
    }
}

/// Provider adapter.
///
/// # Dyn Compatibility
///
/// Async methods return [`BoxFuture`] so adapters live in a [`GatewayRegistry`] as
/// `Arc<dyn PaymentGateway>`.
pub trait PaymentGateway: Send + Sync {
    /// Provider family served by this adapter
    fn method(&self) -> PaymentMethod;

    /// Create a provider order for `amount`. `receipt` is our transaction id.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider call fails.
    fn create_order<'a>(
        &'a self,
        amount: Money,
        intent: &'a BookingIntent,
        receipt: TransactionId,
    ) -> BoxFuture<'a, Result<OrderRef, GatewayError>>;

    /// Ask the provider what happened to `order_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the provider cannot be asked; an unknown provider
    /// state is `Ok(StillPending)`, not an error.
    fn check_status<'a>(&'a self, order_id: &'a str) -> BoxFuture<'a, Result<PaymentOutcome, GatewayError>>;

    /// Verify an inbound callback. Fails closed.
    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentOutcome;
}

/// Which providers accept new orders.
///
/// Passed explicitly with each request so a settings change cannot be observed
/// halfway through one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToggles {
    /// Signed-callback provider enabled
    pub signed_callback: bool,
    /// QR provider enabled
    pub qr: bool,
}

impl ProviderToggles {
    /// Everything on
    pub const ALL: Self = Self {
        signed_callback: true,
        qr: true,
    };

    /// Whether `method` accepts new orders
    #[must_use]
    pub const fn is_enabled(&self, method: PaymentMethod) -> bool {
        match method {
            PaymentMethod::SignedCallback => self.signed_callback,
            PaymentMethod::Qr => self.qr,
        }
    }
}

impl Default for ProviderToggles {
    fn default() -> Self {
        Self::ALL
    }
}

/// Configured adapters, keyed by method
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own method
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    /// Adapter for reconciling an existing transaction, ignoring toggles.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConfigured`] if no adapter is registered.
    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&method)
            .cloned()
            .ok_or(GatewayError::NotConfigured(method))
    }

    /// Adapter for a new order, honouring `toggles`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Disabled`] or [`GatewayError::NotConfigured`].
    pub fn for_new_order(
        &self,
        method: PaymentMethod,
        toggles: ProviderToggles,
    ) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        if !toggles.is_enabled(method) {
            return Err(GatewayError::Disabled(method));
        }
        self.get(method)
    }

    /// Methods configured and enabled under `toggles`
    #[must_use]
    pub fn enabled(&self, toggles: ProviderToggles) -> Vec<PaymentMethod> {
        let mut methods: Vec<PaymentMethod> = self
            .gateways
            .keys()
            .copied()
            .filter(|m| toggles.is_enabled(*m))
            .collect();
        methods.sort_by_key(PaymentMethod::as_str);
        methods
    }

    /// Number of configured adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    /// Whether nothing is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("methods", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}
