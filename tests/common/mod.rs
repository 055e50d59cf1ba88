#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use keyward::checksum;
use keyward::envelope::{AesEnvelope, EnvelopeCodec};
use keyward::identity::HostIdentity;
use keyward::tokenizer::escape;
use keyward::{CheckRequest, LicenseValidator, ValidatorConfig};

pub const PRODUCT: &str = "acme-cad";

/// Build issued key text from `(tag, value)` pairs, optionally sealed with
/// a checksum, wrapped in the AES envelope for [`PRODUCT`].
pub fn issue(fields: &[(&str, &str)], sealed: bool) -> String {
    let text = fields
        .iter()
        .map(|(tag, value)| format!("{tag}={}", escape(value)))
        .collect::<Vec<_>>()
        .join(":");
    let text = if sealed { checksum::seal(&text) } else { text };
    AesEnvelope
        .encode(AesEnvelope::TAG, &text, PRODUCT)
        .expect("envelope encode")
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn validator() -> LicenseValidator {
    init_test_logging();
    LicenseValidator::new(ValidatorConfig::default(), AesEnvelope).expect("validator")
}

pub fn validator_with(config: ValidatorConfig) -> LicenseValidator {
    init_test_logging();
    LicenseValidator::new(config, AesEnvelope).expect("validator")
}

pub fn alice() -> HostIdentity {
    HostIdentity::new("alice", "ws-01")
}

pub fn request(key: &str) -> CheckRequest {
    CheckRequest::new(key, PRODUCT)
        .at(at(2030, 6, 1))
        .with_identity(alice())
}

/// `ts`/`expts` field value for `when`.
pub fn millis(when: DateTime<Utc>) -> String {
    when.timestamp_millis().to_string()
}
