//! Keyward - license-key validation for Rust applications
//!
//! Keys are colon-separated `tag=value` fields wrapped in a product-bound
//! envelope. The validator checks field consistency, an additive checksum,
//! expiration and metered-quota grace, identity binding and password
//! protected fields, and reports non-fatal conditions as [`Warnings`].
//!
//! # Example
//!
//! ```rust,ignore
//! use keyward::{CheckRequest, KeywardConfig, LicenseValidator};
//! use keyward::envelope::AesEnvelope;
//!
//! let config = KeywardConfig::load()?;
//! keyward::logging::init_logging(&config.logging);
//!
//! let validator = LicenseValidator::new(config.validator, AesEnvelope)?;
//! let outcome = validator.check_key(&CheckRequest::new(key_text, "acme-cad"))?;
//! ```
//!
//! For metered keys use [`LicenseValidator::check_key_secure`], which keeps
//! consumption in a signed usage cookie.

// Key text
pub mod checksum;
pub mod envelope;
pub mod keywords;
pub mod tokenizer;

// Validation engines
pub mod expiration;
mod fields;
pub mod identity;
pub mod protection;
pub mod quota;
pub mod record;

// Persistent usage state
pub mod cookie;
pub mod watermark;

// Ambient
pub mod config;
pub mod encryption;
pub mod errors;
pub mod logging;

pub mod secure;
pub mod validator;

pub use config::{KeywardConfig, ValidatorConfig};
pub use cookie::UsageState;
pub use errors::{ErrorKind, LicenseError, LicenseResult};
pub use record::{Binding, LicenseRecord, LicenseType, ModeFlags, Model, Warnings};
pub use secure::{SecureCheckRequest, SecureOutcome, UsageReport};
pub use validator::{CheckOutcome, CheckRequest, CustomKeyCheck, LicenseValidator};
