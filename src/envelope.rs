//! Outer key envelope.
//!
//! A key handed to the validator is `<algorithmTag>~<cipherText>`. The
//! validator only decodes; `encode` exists for issuing keys and for tests.

use crate::encryption::{decrypt_text, derive_key, encrypt_text};
use crate::errors::{LicenseError, LicenseResult};

pub const TAG_SEPARATOR: char = '~';

/// Reversible obfuscation of the outer key text.
pub trait EnvelopeCodec {
    fn decode(&self, algorithm_tag: &str, cipher_text: &str, key: &str) -> LicenseResult<String>;

    fn encode(&self, algorithm_tag: &str, plain_text: &str, key: &str) -> LicenseResult<String>;
}

/// Split `tag~cipher`, falling back to `default_tag` when there is no tag.
pub fn split_envelope<'a>(key_text: &'a str, default_tag: &'a str) -> (&'a str, &'a str) {
    let trimmed = key_text.trim();
    match trimmed.split_once(TAG_SEPARATOR) {
        Some((tag, cipher)) if !tag.is_empty() => (tag, cipher),
        _ => (default_tag, trimmed),
    }
}

/// AES-256-GCM envelope keyed by the product id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesEnvelope;

impl AesEnvelope {
    pub const TAG: &'static str = "AG1";
    const CONTEXT: &'static str = "keyward-envelope-v1";
}

impl EnvelopeCodec for AesEnvelope {
    fn decode(&self, algorithm_tag: &str, cipher_text: &str, key: &str) -> LicenseResult<String> {
        if algorithm_tag != Self::TAG {
            return Err(LicenseError::malformed(format!(
                "unsupported envelope '{algorithm_tag}'"
            )));
        }
        decrypt_text(cipher_text, &derive_key(Self::CONTEXT, key))
            .map_err(|e| LicenseError::malformed(format!("envelope rejected: {e}")))
    }

    fn encode(&self, algorithm_tag: &str, plain_text: &str, key: &str) -> LicenseResult<String> {
        if algorithm_tag != Self::TAG {
            return Err(LicenseError::EncryptionError(format!(
                "unsupported envelope '{algorithm_tag}'"
            )));
        }
        let cipher = encrypt_text(plain_text, &derive_key(Self::CONTEXT, key))?;
        Ok(format!("{}{}{}", Self::TAG, TAG_SEPARATOR, cipher))
    }
}

/// Identity envelope for diagnostics and tests. Key text passes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEnvelope;

impl PlainEnvelope {
    pub const TAG: &'static str = "PLN";
}

impl EnvelopeCodec for PlainEnvelope {
    fn decode(&self, algorithm_tag: &str, cipher_text: &str, _key: &str) -> LicenseResult<String> {
        if algorithm_tag != Self::TAG {
            return Err(LicenseError::malformed(format!(
                "unsupported envelope '{algorithm_tag}'"
            )));
        }
        Ok(cipher_text.to_string())
    }

    fn encode(&self, _algorithm_tag: &str, plain_text: &str, _key: &str) -> LicenseResult<String> {
        Ok(format!("{}{}{}", Self::TAG, TAG_SEPARATOR, plain_text))
    }
}
