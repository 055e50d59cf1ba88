//! Cookie-backed validation with clock-rollback detection.
//!
//! A secure check validates the key the same way [`LicenseValidator::check_key`]
//! does, but takes metered usage from the caller's usage cookie instead of a
//! reported counter, applies the usage increment and hands back a new cookie
//! for the caller to persist.
//!
//! The read-modify-write on the cookie and the high-water mark is not atomic.
//! Callers running several validations for the same product concurrently
//! must serialise them and persist each returned cookie before starting the
//! next call.

use chrono::{DateTime, Utc};

use crate::cookie::UsageState;
use crate::errors::{LicenseError, LicenseResult};
use crate::logging::{key_fingerprint, log_license_event, LicenseEvent};
use crate::quota::{self, grace_allowance};
use crate::record::{LicenseRecord, Warnings};
use crate::validator::{CheckRequest, LicenseValidator, QuotaMode};

/// Inputs of a secure check.
#[derive(Debug, Clone)]
pub struct SecureCheckRequest {
    pub check: CheckRequest,
    /// Cookie returned by the previous call; `None` on first use
    pub cookie: Option<String>,
    /// Secret the cookie is signed with
    pub cookie_password: String,
    /// Usage delta; consumption is negative
    pub usage_increment: i64,
    /// Replaces the stored application state when set
    pub app_state: Option<String>,
    /// Reject unsigned cookies and cookies from other products
    pub secure: bool,
}

impl SecureCheckRequest {
    pub fn new(check: CheckRequest, cookie_password: impl Into<String>) -> Self {
        Self {
            check,
            cookie: None,
            cookie_password: cookie_password.into(),
            usage_increment: 0,
            app_state: None,
            secure: true,
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Record `amount` units of consumption.
    pub fn consume(mut self, amount: i64) -> Self {
        self.usage_increment = -amount;
        self
    }

    pub fn with_usage_increment(mut self, increment: i64) -> Self {
        self.usage_increment = increment;
        self
    }

    pub fn with_app_state(mut self, state: impl Into<String>) -> Self {
        self.app_state = Some(state.into());
        self
    }

    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }
}

/// Result of a successful secure check.
#[derive(Debug, Clone)]
pub struct SecureOutcome {
    pub warnings: Warnings,
    /// Updated cookie; persist it before the next call
    pub cookie: String,
    pub record: LicenseRecord,
    /// Consumption to date after this call
    pub quota_to_date: i64,
    /// Application state carried by the cookie
    pub app_state: Option<String>,
}

/// Non-failing form of a secure check.
///
/// On success `cookie` is the updated cookie. On failure it is the cookie
/// the caller passed in, unchanged, and `error` holds the reason.
#[derive(Debug)]
pub struct UsageReport {
    pub warnings: Warnings,
    pub cookie: Option<String>,
    pub record: Option<LicenseRecord>,
    pub error: Option<LicenseError>,
}

impl UsageReport {
    pub fn is_granted(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> LicenseResult<Warnings> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.warnings),
        }
    }
}

impl LicenseValidator {
    /// Validate a key against its usage cookie and return the next cookie.
    pub fn check_key_secure(&self, request: &SecureCheckRequest) -> LicenseResult<SecureOutcome> {
        let result = self.reconcile(request);
        self.audit(&request.check, &result.as_ref().map(|o| o.warnings));
        result
    }

    /// Like [`check_key_secure`](Self::check_key_secure) but never fails.
    pub fn check_key_secure_report(&self, request: &SecureCheckRequest) -> UsageReport {
        match self.check_key_secure(request) {
            Ok(outcome) => UsageReport {
                warnings: outcome.warnings,
                cookie: Some(outcome.cookie),
                record: Some(outcome.record),
                error: None,
            },
            Err(err) => UsageReport {
                warnings: Warnings::empty(),
                cookie: request.cookie.clone(),
                record: None,
                error: Some(err),
            },
        }
    }

    fn reconcile(&self, request: &SecureCheckRequest) -> LicenseResult<SecureOutcome> {
        let check = &request.check;
        if request.cookie_password.is_empty() {
            return Err(LicenseError::BadParams("cookie password is empty".to_string()));
        }

        let mut state = self.cookies.parse(
            request.cookie.as_deref().unwrap_or(""),
            &check.product_id,
            &request.cookie_password,
            request.secure,
            check.now,
        )?;

        let (record, mut warnings) = self.run_checks(
            check,
            QuotaMode::Deferred {
                usage: state.quota_to_date,
            },
        )?;

        if let Some(limit) = record.quota() {
            let grace = grace_allowance(
                limit,
                check.grace_days,
                record.is_privileged(),
                &self.config,
            );

            if request.usage_increment < 0 {
                let mark = self
                    .watermark
                    .read_high_water_mark(&check.product_id)?;
                let rolled_back = mark.is_some_and(|m| m > check.now) || state.ts > check.now;
                if rolled_back {
                    let details = format!(
                        "now={} mark={:?} cookie_ts={}",
                        check.now, mark, state.ts
                    );
                    log_license_event(
                        LicenseEvent::ClockRollback,
                        &key_fingerprint(&check.key),
                        Some(&details),
                    );
                    return Err(LicenseError::ClockTamper(
                        "system clock is behind the last recorded use".to_string(),
                    ));
                }

                let step = quota::evaluate_incremental(
                    limit,
                    state.quota_to_date,
                    request.usage_increment,
                    check.near_quota_threshold,
                    grace,
                )?;
                warnings |= step.warnings;
                state.quota_to_date = step.quota_to_date;

                self.watermark
                    .advance_high_water_mark(&check.product_id, check.now)?;
            } else {
                warnings |= quota::evaluate(
                    limit,
                    state.quota_to_date,
                    check.near_quota_threshold,
                    grace,
                )?;
            }
        } else {
            state.quota_to_date =
                quota::advance_total(state.quota_to_date, request.usage_increment);
        }

        if check.now > state.ts {
            state.ts = check.now;
        }
        if let Some(app_state) = &request.app_state {
            state.app_state = Some(app_state.clone());
        }

        let cookie = self
            .cookies
            .serialize(&state, &check.product_id, &request.cookie_password)?;
        log_license_event(
            LicenseEvent::CookieIssued,
            &key_fingerprint(&check.key),
            Some(&format!("quota_to_date={}", state.quota_to_date)),
        );

        Ok(SecureOutcome {
            warnings,
            cookie,
            record,
            quota_to_date: state.quota_to_date,
            app_state: state.app_state,
        })
    }

    /// A first cookie for `product`, with no consumption recorded.
    pub fn create_key_cookie_seed(
        &self,
        product: &str,
        password: &str,
        app_state: Option<&str>,
    ) -> LicenseResult<String> {
        check_cookie_params(product, password)?;
        let state = UsageState {
            app_state: app_state.map(str::to_string),
            ..UsageState::fresh(Utc::now())
        };
        self.cookies.serialize(&state, product, password)
    }

    /// Verify a cookie and forget the product's high-water mark.
    ///
    /// Used when an installation is retired or moved: the next secure check
    /// starts without rollback history.
    pub fn cleanup_key_cookie(
        &self,
        cookie: &str,
        product: &str,
        password: &str,
    ) -> LicenseResult<()> {
        self.read_key_cookie(cookie, product, password)?;
        self.watermark.clear_high_water_mark(product)?;
        log::info!("cleared usage history for product '{}'", product);
        Ok(())
    }

    /// Decode a signed cookie without validating a key.
    pub fn read_key_cookie(
        &self,
        cookie: &str,
        product: &str,
        password: &str,
    ) -> LicenseResult<UsageState> {
        check_cookie_params(product, password)?;
        if cookie.trim().is_empty() {
            return Err(LicenseError::CookieError("cookie is empty".to_string()));
        }
        self.cookies.parse(cookie, product, password, true, Utc::now())
    }

    pub fn key_cookie_app_state(
        &self,
        cookie: &str,
        product: &str,
        password: &str,
    ) -> LicenseResult<Option<String>> {
        Ok(self.read_key_cookie(cookie, product, password)?.app_state)
    }

    pub fn key_cookie_quota_to_date(
        &self,
        cookie: &str,
        product: &str,
        password: &str,
    ) -> LicenseResult<i64> {
        Ok(self.read_key_cookie(cookie, product, password)?.quota_to_date)
    }

    /// Timestamp of the last secure check that wrote the cookie.
    pub fn key_cookie_ts(
        &self,
        cookie: &str,
        product: &str,
        password: &str,
    ) -> LicenseResult<DateTime<Utc>> {
        Ok(self.read_key_cookie(cookie, product, password)?.ts)
    }
}

fn check_cookie_params(product: &str, password: &str) -> LicenseResult<()> {
    if product.is_empty() {
        return Err(LicenseError::BadParams("product id is empty".to_string()));
    }
    if password.is_empty() {
        return Err(LicenseError::BadParams("cookie password is empty".to_string()));
    }
    Ok(())
}
