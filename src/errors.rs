//! Error types for license-key validation.
//!
//! Every failure is terminal for the current check: the partially parsed
//! record is discarded and nothing but the error reaches the caller.

use thiserror::Error;

/// Failure class of a [`LicenseError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedKey,
    IntegrityFailure,
    Expired,
    QuotaViolation,
    IdentityMismatch,
    PasswordMismatch,
    ClockTamper,
    BadParams,
    Config,
    Storage,
    Crypto,
    Cookie,
}

impl ErrorKind {
    /// Returns true for failures that mean "do not grant access" because of
    /// the key or the caller's usage, as opposed to an environment problem.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedKey
                | ErrorKind::IntegrityFailure
                | ErrorKind::Expired
                | ErrorKind::QuotaViolation
                | ErrorKind::IdentityMismatch
                | ErrorKind::PasswordMismatch
                | ErrorKind::ClockTamper
                | ErrorKind::BadParams
        )
    }
}

#[derive(Debug, Error)]
pub enum LicenseError {
    /// Unknown tag, duplicate set-once field, unparsable value or broken token.
    #[error("malformed license key: {0}")]
    MalformedKey(String),

    /// Embedded checksum does not match the key text.
    #[error("license key integrity check failed (expected {expected}, computed {actual})")]
    IntegrityFailure { expected: u64, actual: u64 },

    /// Expiration exceeded beyond any applicable grace.
    #[error("license expired: {0}")]
    Expired(String),

    /// Usage exceeds a limit beyond the allowed grace.
    #[error("usage {current} exceeds limit {limit} (allowed over: {allowed_over})")]
    QuotaViolation {
        limit: i64,
        current: i64,
        allowed_over: i64,
    },

    #[error("license is bound to another identity: {0}")]
    IdentityMismatch(String),

    #[error("protected key mismatch: {0}")]
    PasswordMismatch(String),

    /// A stored usage timestamp is newer than the current time.
    #[error("clock rollback detected: {0}")]
    ClockTamper(String),

    #[error("inconsistent parameters: {0}")]
    BadParams(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("keyring error: {0}")]
    KeyringError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("usage cookie rejected: {0}")]
    CookieError(String),
}

impl LicenseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LicenseError::MalformedKey(_) => ErrorKind::MalformedKey,
            LicenseError::IntegrityFailure { .. } => ErrorKind::IntegrityFailure,
            LicenseError::Expired(_) => ErrorKind::Expired,
            LicenseError::QuotaViolation { .. } => ErrorKind::QuotaViolation,
            LicenseError::IdentityMismatch(_) => ErrorKind::IdentityMismatch,
            LicenseError::PasswordMismatch(_) => ErrorKind::PasswordMismatch,
            LicenseError::ClockTamper(_) => ErrorKind::ClockTamper,
            LicenseError::BadParams(_) => ErrorKind::BadParams,
            LicenseError::ConfigError(_) => ErrorKind::Config,
            LicenseError::StorageError(_) | LicenseError::KeyringError(_) => ErrorKind::Storage,
            LicenseError::EncryptionError(_) | LicenseError::DecryptionError(_) => {
                ErrorKind::Crypto
            }
            LicenseError::CookieError(_) => ErrorKind::Cookie,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        LicenseError::MalformedKey(msg.into())
    }
}

impl From<keyring::Error> for LicenseError {
    fn from(e: keyring::Error) -> Self {
        LicenseError::KeyringError(e.to_string())
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_access_denied() {
        assert!(LicenseError::malformed("x").kind().is_access_denied());
        assert!(LicenseError::ClockTamper("x".into())
            .kind()
            .is_access_denied());
        assert!(!LicenseError::ConfigError("x".into())
            .kind()
            .is_access_denied());
        assert!(!LicenseError::CookieError("x".into())
            .kind()
            .is_access_denied());
    }

    #[test]
    fn quota_violation_display() {
        let err = LicenseError::QuotaViolation {
            limit: 1000,
            current: 1300,
            allowed_over: 250,
        };
        let display = format!("{}", err);
        assert!(display.contains("1300"));
        assert!(display.contains("250"));
    }

    #[test]
    fn io_errors_convert_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LicenseError = io.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
