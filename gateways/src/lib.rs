//! # Studyhall payment gateways
//!
//! `reqwest` adapters implementing [`studyhall_core::payment::PaymentGateway`]:
//!
//! - [`SignedCallbackGateway`]: order creation with basic auth, HMAC-SHA256 signed
//!   callbacks verified in constant time, payment listing for status checks
//! - [`QrGateway`]: QR orders signed with a salted SHA-256 checksum, completion observed
//!   only by polling
//!
//! Adapters report outcomes. They never touch reservations.
//!
//! ## Example
//!
//! ```no_run
//! use studyhall_gateways::{GatewaySettings, SignedCallbackConfig, build_registry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_registry(&GatewaySettings {
//!     signed_callback: Some(SignedCallbackConfig {
//!         key_id: "rzp_test_key".to_string(),
//!         key_secret: "secret".to_string(),
//!         base_url: "https://api.example.com/v1".to_string(),
//!     }),
//!     ..GatewaySettings::default()
//! })?;
//! assert_eq!(registry.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod factory;
mod http;
pub mod qr;
pub mod signed;

pub use factory::{GatewaySettings, SetupError, build_registry};
pub use qr::{QrConfig, QrGateway};
pub use signed::{SignedCallbackConfig, SignedCallbackGateway, sign_callback, verify_signature};
