//! Registry construction from settings.

use crate::qr::{QrConfig, QrGateway};
use crate::signed::{SignedCallbackConfig, SignedCallbackGateway};
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::payment::GatewayRegistry;
use thiserror::Error;

/// Failure building the adapters
#[derive(Debug, Error)]
pub enum SetupError {
    /// The shared HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Which providers to configure. `None` leaves a provider out of the registry.
#[derive(Clone, Debug)]
pub struct GatewaySettings {
    /// Signed-callback provider, when credentials are present
    pub signed_callback: Option<SignedCallbackConfig>,
    /// QR provider, when credentials are present
    pub qr: Option<QrConfig>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            signed_callback: None,
            qr: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Build a registry with one shared HTTP client.
///
/// # Errors
///
/// Returns [`SetupError::HttpClient`] if the client cannot be built.
pub fn build_registry(settings: &GatewaySettings) -> Result<GatewayRegistry, SetupError> {
    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| SetupError::HttpClient(e.to_string()))?;

    let mut registry = GatewayRegistry::new();
    if let Some(config) = &settings.signed_callback {
        registry = registry.with(Arc::new(SignedCallbackGateway::new(client.clone(), config.clone())));
    } else {
        tracing::warn!("Signed-callback provider not configured");
    }
    if let Some(config) = &settings.qr {
        registry = registry.with(Arc::new(QrGateway::new(client, config.clone())));
    } else {
        tracing::warn!("QR provider not configured");
    }

    tracing::info!(providers = registry.len(), "Payment gateways configured");
    Ok(registry)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use studyhall_core::types::PaymentMethod;

    #[test]
    fn test_missing_credentials_leave_provider_out() {
        let settings = GatewaySettings {
            signed_callback: Some(SignedCallbackConfig {
                key_id: "key".to_string(),
                key_secret: "secret".to_string(),
                base_url: "http://localhost".to_string(),
            }),
            ..GatewaySettings::default()
        };

        let registry = build_registry(&settings).unwrap();

        assert!(registry.get(PaymentMethod::SignedCallback).is_ok());
        assert!(registry.get(PaymentMethod::Qr).is_err());
    }
}
