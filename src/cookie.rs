//! Signed usage-state cookie.
//!
//! The cookie carries the last usage timestamp, the metered consumption to
//! date and an opaque application state between validation calls. The
//! caller persists it; the validator never stores it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::encryption::derive_key;
use crate::errors::{LicenseError, LicenseResult};

/// Logical contents of a usage cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageState {
    pub ts: DateTime<Utc>,
    pub quota_to_date: i64,
    pub app_state: Option<String>,
}

impl UsageState {
    /// State for a caller that has no cookie yet.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            ts: now,
            quota_to_date: 0,
            app_state: None,
        }
    }
}

/// Codec for usage cookies.
pub trait CookieCodec {
    /// Parse cookie text. Empty text yields [`UsageState::fresh`].
    fn parse(
        &self,
        cookie_text: &str,
        product: &str,
        password: &str,
        secure: bool,
        now: DateTime<Utc>,
    ) -> LicenseResult<UsageState>;

    fn serialize(&self, state: &UsageState, product: &str, password: &str)
        -> LicenseResult<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CookieBody {
    v: u8,
    product: String,
    ts: i64,
    quota_to_date: i64,
    app_state: Option<String>,
}

/// Reference codec: `base64url(json).hex(hmac-sha256)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedCookieCodec;

impl SignedCookieCodec {
    const VERSION: u8 = 1;
    const CONTEXT: &'static str = "keyward-cookie-v1";

    fn signing_key(product: &str, password: &str) -> hmac::Key {
        let secret = format!("{product}\0{password}");
        hmac::Key::new(hmac::HMAC_SHA256, &derive_key(Self::CONTEXT, &secret))
    }
}

impl CookieCodec for SignedCookieCodec {
    fn parse(
        &self,
        cookie_text: &str,
        product: &str,
        password: &str,
        secure: bool,
        now: DateTime<Utc>,
    ) -> LicenseResult<UsageState> {
        let cookie_text = cookie_text.trim();
        if cookie_text.is_empty() {
            return Ok(UsageState::fresh(now));
        }

        let (body_b64, tag_hex) = cookie_text
            .split_once('.')
            .ok_or_else(|| LicenseError::CookieError("missing signature separator".into()))?;

        if tag_hex.is_empty() {
            if secure {
                return Err(LicenseError::CookieError("cookie is not signed".into()));
            }
        } else {
            let tag = hex::decode(tag_hex)
                .map_err(|e| LicenseError::CookieError(format!("bad signature encoding: {e}")))?;
            hmac::verify(&Self::signing_key(product, password), body_b64.as_bytes(), &tag)
                .map_err(|_| LicenseError::CookieError("signature mismatch".into()))?;
        }

        let body_bytes = B64
            .decode(body_b64)
            .map_err(|e| LicenseError::CookieError(format!("bad body encoding: {e}")))?;
        let body: CookieBody = serde_json::from_slice(&body_bytes)
            .map_err(|e| LicenseError::CookieError(format!("bad body: {e}")))?;

        if body.v != Self::VERSION {
            return Err(LicenseError::CookieError(format!(
                "unsupported cookie version {}",
                body.v
            )));
        }
        if secure && body.product != product {
            return Err(LicenseError::CookieError(format!(
                "cookie belongs to product '{}'",
                body.product
            )));
        }

        let ts = DateTime::<Utc>::from_timestamp_millis(body.ts)
            .ok_or_else(|| LicenseError::CookieError("timestamp out of range".into()))?;

        Ok(UsageState {
            ts,
            quota_to_date: body.quota_to_date,
            app_state: body.app_state,
        })
    }

    fn serialize(
        &self,
        state: &UsageState,
        product: &str,
        password: &str,
    ) -> LicenseResult<String> {
        let body = CookieBody {
            v: Self::VERSION,
            product: product.to_string(),
            ts: state.ts.timestamp_millis(),
            quota_to_date: state.quota_to_date,
            app_state: state.app_state.clone(),
        };
        let json = serde_json::to_vec(&body)
            .map_err(|e| LicenseError::CookieError(format!("failed to serialize cookie: {e}")))?;
        let body_b64 = B64.encode(json);
        let tag = hmac::sign(&Self::signing_key(product, password), body_b64.as_bytes());
        Ok(format!("{}.{}", body_b64, hex::encode(tag.as_ref())))
    }
}
