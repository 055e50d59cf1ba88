//! License-key validation entry point.
//!
//! A check runs in a fixed order: envelope decode, tokenize, per-field
//! validation, checksum, model derivation, expiration, quota, identity
//! binding, protected-field decryption and finally the application's own
//! [`CustomKeyCheck`]. The first failure ends the call and the partially
//! built record is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use keyward::config::ValidatorConfig;
//! use keyward::envelope::AesEnvelope;
//! use keyward::identity::{IdentityProvider, SystemIdentity};
//! use keyward::validator::{CheckRequest, LicenseValidator};
//!
//! let validator = LicenseValidator::new(ValidatorConfig::default(), AesEnvelope)?;
//! let request = CheckRequest::new(&key_text, "acme-cad")
//!     .with_identity(SystemIdentity.identity())
//!     .with_grace_days(7);
//! let outcome = validator.check_key(&request)?;
//! if !outcome.warnings.is_empty() {
//!     println!("license warnings: {:?}", outcome.warnings);
//! }
//! ```

use chrono::{DateTime, Utc};

use crate::checksum;
use crate::config::ValidatorConfig;
use crate::cookie::{CookieCodec, SignedCookieCodec};
use crate::envelope::{split_envelope, EnvelopeCodec};
use crate::errors::{LicenseError, LicenseResult};
use crate::expiration;
use crate::fields::{apply_token, finalize, FieldContext};
use crate::identity::{bind, require_binding, HostIdentity};
use crate::keywords::FieldCode;
use crate::logging::{key_fingerprint, log_license_event, LicenseEvent};
use crate::protection::{unlock, ExpectedProtection, FieldProtection, PasswordFieldCipher};
use crate::quota::{self, grace_allowance};
use crate::record::{LicenseRecord, Warnings};
use crate::tokenizer::tokenize;
use crate::watermark::{HighWaterMark, MemoryWatermark};

/// Inputs of one check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// Key text as issued (`tag~cipher`)
    pub key: String,
    /// Product id; also the envelope key
    pub product_id: String,
    pub now: DateTime<Utc>,
    /// Metered usage to date
    pub usage: i64,
    /// Seats currently in use
    pub concurrent: i64,
    /// Requested grace, in days for expiration and units for limits
    pub grace_days: i64,
    /// Remaining quota below which `NEAR_QUOTA` is raised
    pub near_quota_threshold: i64,
    pub identity: HostIdentity,
    /// Product name a protected key must carry; requires `public_key`
    pub product_name: Option<String>,
    /// Public key a protected key's password must derive; requires `product_name`
    pub public_key: Option<String>,
    /// Marker that exposes the key's app password
    pub master_marker: Option<String>,
}

impl CheckRequest {
    pub fn new(key: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            product_id: product_id.into(),
            now: Utc::now(),
            usage: 0,
            concurrent: 0,
            grace_days: 0,
            near_quota_threshold: 0,
            identity: HostIdentity::default(),
            product_name: None,
            public_key: None,
            master_marker: None,
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_usage(mut self, usage: i64) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_concurrent(mut self, concurrent: i64) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_grace_days(mut self, grace_days: i64) -> Self {
        self.grace_days = grace_days;
        self
    }

    pub fn with_near_quota_threshold(mut self, threshold: i64) -> Self {
        self.near_quota_threshold = threshold;
        self
    }

    pub fn with_identity(mut self, identity: HostIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn expect_protection(
        mut self,
        product_name: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        self.product_name = Some(product_name.into());
        self.public_key = Some(public_key.into());
        self
    }

    pub fn with_master_marker(mut self, marker: impl Into<String>) -> Self {
        self.master_marker = Some(marker.into());
        self
    }

    fn expected_protection(&self) -> LicenseResult<Option<ExpectedProtection<'_>>> {
        match (self.product_name.as_deref(), self.public_key.as_deref()) {
            (Some(product_name), Some(public_key)) => Ok(Some(ExpectedProtection {
                product_name,
                public_key,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(LicenseError::BadParams(
                "product name supplied without a public key".to_string(),
            )),
            (None, Some(_)) => Err(LicenseError::BadParams(
                "public key supplied without a product name".to_string(),
            )),
        }
    }
}

/// Application hook that inspects the decrypted custom key.
///
/// The returned bits are OR-ed into the check's warnings; bits above
/// [`Warnings::GRACE_EXP_TRUNCATED`] are free for the application. An error
/// fails the check.
pub trait CustomKeyCheck {
    fn check_custom_key(&self, custom_key: Option<&str>) -> LicenseResult<Warnings>;
}

impl<F> CustomKeyCheck for F
where
    F: Fn(Option<&str>) -> LicenseResult<Warnings>,
{
    fn check_custom_key(&self, custom_key: Option<&str>) -> LicenseResult<Warnings> {
        self(custom_key)
    }
}

/// Result of a successful check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub warnings: Warnings,
    pub record: LicenseRecord,
}

/// How the quota field is evaluated during a check.
#[derive(Debug, Clone, Copy)]
pub(crate) enum QuotaMode {
    /// Caller-reported usage, full evaluation
    Basic,
    /// Usage from a cookie; the reconciler evaluates afterwards
    Deferred { usage: i64 },
}

/// Validates license keys with a fixed policy and set of collaborators.
pub struct LicenseValidator {
    pub(crate) config: ValidatorConfig,
    pub(crate) envelope: Box<dyn EnvelopeCodec + Send + Sync>,
    pub(crate) protection: Box<dyn FieldProtection + Send + Sync>,
    pub(crate) cookies: Box<dyn CookieCodec + Send + Sync>,
    pub(crate) watermark: Box<dyn HighWaterMark + Send + Sync>,
    pub(crate) custom_check: Option<Box<dyn CustomKeyCheck + Send + Sync>>,
}

impl LicenseValidator {
    /// Build a validator with the reference field cipher, signed cookie
    /// codec and an in-memory high-water mark.
    pub fn new<E>(config: ValidatorConfig, envelope: E) -> LicenseResult<Self>
    where
        E: EnvelopeCodec + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            envelope: Box::new(envelope),
            protection: Box::new(PasswordFieldCipher),
            cookies: Box::new(SignedCookieCodec),
            watermark: Box::new(MemoryWatermark::new()),
            custom_check: None,
        })
    }

    pub fn with_protection<P>(mut self, protection: P) -> Self
    where
        P: FieldProtection + Send + Sync + 'static,
    {
        self.protection = Box::new(protection);
        self
    }

    pub fn with_cookie_codec<C>(mut self, cookies: C) -> Self
    where
        C: CookieCodec + Send + Sync + 'static,
    {
        self.cookies = Box::new(cookies);
        self
    }

    pub fn with_watermark<W>(mut self, watermark: W) -> Self
    where
        W: HighWaterMark + Send + Sync + 'static,
    {
        self.watermark = Box::new(watermark);
        self
    }

    pub fn with_custom_check<K>(mut self, check: K) -> Self
    where
        K: CustomKeyCheck + Send + Sync + 'static,
    {
        self.custom_check = Some(Box::new(check));
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a key. Returns the warnings raised and the decoded record.
    pub fn check_key(&self, request: &CheckRequest) -> LicenseResult<CheckOutcome> {
        let result = self.run_checks(request, QuotaMode::Basic);
        self.audit(request, &result.as_ref().map(|(_, w)| *w));
        result.map(|(record, warnings)| CheckOutcome { warnings, record })
    }

    pub(crate) fn audit(&self, request: &CheckRequest, result: &Result<Warnings, &LicenseError>) {
        let key_id = key_fingerprint(&request.key);
        match result {
            Ok(warnings) => {
                let details = format!("warnings={:?}", warnings);
                log_license_event(LicenseEvent::Checked, &key_id, Some(&details));
                if warnings.contains(Warnings::GRACE_EXP_ACTIVE) {
                    log_license_event(LicenseEvent::GraceActive, &key_id, None);
                }
                if warnings.contains(Warnings::GRACE_QUOTA) {
                    log_license_event(LicenseEvent::QuotaGrace, &key_id, None);
                }
            }
            Err(err) => {
                let details = err.to_string();
                log_license_event(LicenseEvent::CheckFailed, &key_id, Some(&details));
            }
        }
    }

    pub(crate) fn run_checks(
        &self,
        request: &CheckRequest,
        quota_mode: QuotaMode,
    ) -> LicenseResult<(LicenseRecord, Warnings)> {
        let expected = request.expected_protection()?;
        if request.product_id.is_empty() {
            return Err(LicenseError::BadParams("product id is empty".to_string()));
        }

        let config = &self.config;
        let mut record = LicenseRecord::new(&request.key);
        let mut warnings = Warnings::empty();

        let (tag, cipher) = split_envelope(&request.key, &config.envelope_tag);
        let text = self.envelope.decode(tag, cipher, &request.product_id)?;
        if config.debug {
            log::debug!("decoded key text: {}", text);
        }

        let tokens = tokenize(&text)?;
        if config.debug {
            log::debug!("{} tokens: {:?}", tokens.len(), tokens);
        }

        record.privileged = match config.bypass_marker.as_deref() {
            Some(marker) => tokens
                .iter()
                .any(|t| t.code == FieldCode::AppPassword && t.value == marker),
            None => false,
        };

        let usage = match quota_mode {
            QuotaMode::Basic => request.usage,
            QuotaMode::Deferred { usage } => usage,
        };
        let ctx = FieldContext {
            config,
            now: request.now,
            usage,
            concurrent: request.concurrent,
            grace: request.grace_days,
        };
        for token in &tokens {
            warnings |= apply_token(&mut record, token, &ctx)?;
        }

        if let Some(expected_sum) = record.checksum {
            let offset = tokens
                .iter()
                .find(|t| t.code == FieldCode::Checksum)
                .map(|t| t.offset)
                .unwrap_or(0);
            checksum::verify(&text, offset, expected_sum)?;
        }

        finalize(&mut record);

        if let Some(expiration) = record.expiration {
            warnings |= expiration::evaluate(
                request.now,
                expiration,
                record.issued,
                request.grace_days,
                record.privileged,
                config,
            )?;
        }

        if let (QuotaMode::Basic, Some(limit)) = (quota_mode, record.quota) {
            let grace = grace_allowance(limit, request.grace_days, record.privileged, config);
            warnings |= quota::evaluate(limit, request.usage, request.near_quota_threshold, grace)?;
        }

        require_binding(&record)?;
        bind(&record, &request.identity, config)?;

        unlock(&mut record, self.protection.as_ref(), expected, config)?;

        if let Some(check) = &self.custom_check {
            warnings |= check.check_custom_key(record.custom_key())?;
        }

        record.password_visible = matches!(
            (config.master_marker.as_deref(), request.master_marker.as_deref()),
            (Some(configured), Some(presented)) if configured == presented
        );

        Ok((record, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::PlainEnvelope;

    fn plain(text: &str) -> String {
        format!("PLN~{text}")
    }

    fn validator() -> LicenseValidator {
        LicenseValidator::new(ValidatorConfig::default(), PlainEnvelope).unwrap()
    }

    fn request(text: &str) -> CheckRequest {
        CheckRequest::new(plain(text), "acme").with_identity(HostIdentity::new("alice", "ws-01"))
    }

    #[test]
    fn bound_key_without_checksum_passes() {
        let outcome = validator().check_key(&request("usr=alice:cust=Acme Corp")).unwrap();
        assert!(outcome.warnings.is_empty());
        assert!(!outcome.record.has_checksum());
    }

    #[test]
    fn key_without_binding_is_malformed() {
        for text in ["vsn=1", "cust=Acme", "qta=10:exp=2099-01-01"] {
            assert!(
                matches!(
                    validator().check_key(&request(text)),
                    Err(LicenseError::MalformedKey(_))
                ),
                "expected MalformedKey for {}",
                text
            );
        }
    }

    #[test]
    fn half_protection_params_are_bad_params() {
        let mut req = request("usr=alice");
        req.product_name = Some("acme".into());
        assert!(matches!(
            validator().check_key(&req),
            Err(LicenseError::BadParams(_))
        ));

        let mut req = request("usr=alice");
        req.public_key = Some("ab".into());
        assert!(matches!(
            validator().check_key(&req),
            Err(LicenseError::BadParams(_))
        ));
    }

    #[test]
    fn empty_product_id_is_bad_params() {
        assert!(matches!(
            validator().check_key(&CheckRequest::new(plain("usr=alice"), "")),
            Err(LicenseError::BadParams(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        for grace_divisor in [0, 1 << 32] {
            let config = ValidatorConfig {
                grace_divisor,
                ..ValidatorConfig::default()
            };
            assert!(LicenseValidator::new(config, PlainEnvelope).is_err());
        }
    }

    #[test]
    fn huge_grace_request_is_bad_params() {
        let req = request("usr=alice:exp=2099-01-01").with_grace_days(i64::MAX);
        assert!(matches!(
            validator().check_key(&req),
            Err(LicenseError::BadParams(_))
        ));
    }

    #[test]
    fn master_marker_exposes_password() {
        let config = ValidatorConfig {
            master_marker: Some("reveal".into()),
            ..ValidatorConfig::default()
        };
        let validator = LicenseValidator::new(config, PlainEnvelope).unwrap();
        let pk = PasswordFieldCipher.derive_public_key("hunter2").unwrap();
        let text = "usr=alice:pwd=hunter2:prod=acme-cad";

        let hidden = validator
            .check_key(&request(text).expect_protection("acme-cad", pk.clone()))
            .unwrap();
        assert_eq!(hidden.record.app_password(), None);

        let shown = validator
            .check_key(
                &request(text)
                    .expect_protection("acme-cad", pk)
                    .with_master_marker("reveal"),
            )
            .unwrap();
        assert_eq!(shown.record.app_password(), Some("hunter2"));
    }

    #[test]
    fn custom_check_bits_join_the_warnings() {
        const GOLD_TIER: u32 = 0x100;
        let validator = validator().with_custom_check(|custom_key: Option<&str>| {
            Ok(match custom_key {
                Some("gold") => Warnings::from_bits_retain(GOLD_TIER),
                _ => Warnings::empty(),
            })
        });

        let outcome = validator
            .check_key(&request("usr=alice:cst=gold").with_near_quota_threshold(0))
            .unwrap();
        assert_eq!(outcome.warnings.bits(), GOLD_TIER);

        let outcome = validator
            .check_key(&request("usr=alice:qta=100:cst=gold").with_usage(95).with_near_quota_threshold(5))
            .unwrap();
        assert_eq!(outcome.warnings.bits(), GOLD_TIER | Warnings::NEAR_QUOTA.bits());

        let outcome = validator.check_key(&request("usr=alice")).unwrap();
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn custom_check_can_reject() {
        struct RequireCustomKey;
        impl CustomKeyCheck for RequireCustomKey {
            fn check_custom_key(&self, custom_key: Option<&str>) -> LicenseResult<Warnings> {
                custom_key
                    .map(|_| Warnings::empty())
                    .ok_or_else(|| LicenseError::malformed("custom key required"))
            }
        }

        let validator = validator().with_custom_check(RequireCustomKey);
        assert!(validator.check_key(&request("usr=alice:cst=x")).is_ok());
        assert!(matches!(
            validator.check_key(&request("usr=alice")),
            Err(LicenseError::MalformedKey(_))
        ));
    }
}
