//! Password-protected fields.
//!
//! A key carrying `pwd` has its `cst`, `cooky` and (when prefixed with the
//! options magic) `opt` values encrypted. The public key derived from the
//! password unlocks them, and must match what the application expects.

use ring::digest::{digest, SHA256};

use crate::config::ValidatorConfig;
use crate::encryption::{decrypt_text, derive_key, encrypt_text};
use crate::errors::{LicenseError, LicenseResult};
use crate::record::LicenseRecord;

/// Asymmetric field-protection service.
pub trait FieldProtection {
    fn derive_public_key(&self, password: &str) -> LicenseResult<String>;

    fn decrypt(&self, ciphertext: &str, public_key: &str) -> LicenseResult<String>;
}

/// What the application expects a protected key to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedProtection<'a> {
    pub product_name: &'a str,
    pub public_key: &'a str,
}

/// Reference field protection: hex SHA-256 public key, AES-GCM field cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordFieldCipher;

impl PasswordFieldCipher {
    const PK_CONTEXT: &'static [u8] = b"keyward-field-pk\0";
    const FIELD_CONTEXT: &'static str = "keyward-field-v1";

    /// Encrypt a field value for a key that will carry the matching `pwd`.
    pub fn encrypt(&self, plaintext: &str, public_key: &str) -> LicenseResult<String> {
        encrypt_text(plaintext, &derive_key(Self::FIELD_CONTEXT, public_key))
    }
}

impl FieldProtection for PasswordFieldCipher {
    fn derive_public_key(&self, password: &str) -> LicenseResult<String> {
        if password.is_empty() {
            return Err(LicenseError::PasswordMismatch(
                "empty app password".to_string(),
            ));
        }
        let mut material = Self::PK_CONTEXT.to_vec();
        material.extend_from_slice(password.as_bytes());
        Ok(hex::encode(digest(&SHA256, &material)))
    }

    fn decrypt(&self, ciphertext: &str, public_key: &str) -> LicenseResult<String> {
        decrypt_text(ciphertext, &derive_key(Self::FIELD_CONTEXT, public_key))
    }
}

fn decrypt_field(
    protection: &dyn FieldProtection,
    slot: &mut Option<String>,
    public_key: &str,
    name: &str,
) -> LicenseResult<()> {
    if let Some(cipher) = slot.as_deref() {
        let plain = protection.decrypt(cipher, public_key).map_err(|e| {
            LicenseError::PasswordMismatch(format!("{name} could not be decrypted: {e}"))
        })?;
        *slot = Some(plain);
    }
    Ok(())
}

/// Verify a protected key and replace its protected fields with plaintext.
///
/// Privileged keys skip the comparison with the caller's expectation but
/// are still decrypted. Keys without `pwd` pass untouched.
pub(crate) fn unlock(
    record: &mut LicenseRecord,
    protection: &dyn FieldProtection,
    expected: Option<ExpectedProtection<'_>>,
    config: &ValidatorConfig,
) -> LicenseResult<()> {
    let Some(password) = record.app_password.clone() else {
        return Ok(());
    };

    let public_key = protection.derive_public_key(&password)?;

    if !record.privileged {
        let Some(expected) = expected else {
            return Err(LicenseError::PasswordMismatch(
                "key is password protected but no password was supplied".to_string(),
            ));
        };
        if public_key != expected.public_key {
            return Err(LicenseError::PasswordMismatch(
                "public key does not match".to_string(),
            ));
        }
        if record.product.as_deref() != Some(expected.product_name) {
            return Err(LicenseError::PasswordMismatch(format!(
                "key is not issued for product '{}'",
                expected.product_name
            )));
        }
    }

    decrypt_field(protection, &mut record.custom_key, &public_key, "custom key")?;
    decrypt_field(protection, &mut record.custom_cookie, &public_key, "custom cookie")?;

    let sealed_options = record
        .options
        .as_deref()
        .and_then(|opt| opt.strip_prefix(config.options_magic.as_str()))
        .map(str::to_string);
    if let Some(cipher) = sealed_options {
        let mut slot = Some(cipher);
        decrypt_field(protection, &mut slot, &public_key, "options")?;
        record.options = slot;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protected_record(password: &str, product: &str) -> (LicenseRecord, String) {
        let cipher = PasswordFieldCipher;
        let pk = cipher.derive_public_key(password).unwrap();
        let mut record = LicenseRecord::new("k");
        record.app_password = Some(password.to_string());
        record.product = Some(product.to_string());
        record.custom_key = Some(cipher.encrypt("seat-42", &pk).unwrap());
        record.custom_cookie = Some(cipher.encrypt("cookie-data", &pk).unwrap());
        record.options = Some(format!("98765{}", cipher.encrypt("pro,export", &pk).unwrap()));
        (record, pk)
    }

    #[test]
    fn decrypts_all_protected_fields() {
        let (mut record, pk) = protected_record("s3cret", "acme-cad");
        let expected = ExpectedProtection {
            product_name: "acme-cad",
            public_key: &pk,
        };
        unlock(&mut record, &PasswordFieldCipher, Some(expected), &ValidatorConfig::default())
            .unwrap();
        assert_eq!(record.custom_key(), Some("seat-42"));
        assert_eq!(record.custom_cookie(), Some("cookie-data"));
        assert_eq!(record.options(), Some("pro,export"));
    }

    #[test]
    fn plain_options_are_left_alone() {
        let (mut record, pk) = protected_record("s3cret", "acme-cad");
        record.options = Some("pro".to_string());
        let expected = ExpectedProtection {
            product_name: "acme-cad",
            public_key: &pk,
        };
        unlock(&mut record, &PasswordFieldCipher, Some(expected), &ValidatorConfig::default())
            .unwrap();
        assert_eq!(record.options(), Some("pro"));
    }

    #[test]
    fn protected_key_without_expectation_fails() {
        let (mut record, _) = protected_record("s3cret", "acme-cad");
        assert!(matches!(
            unlock(&mut record, &PasswordFieldCipher, None, &ValidatorConfig::default()),
            Err(LicenseError::PasswordMismatch(_))
        ));
    }

    #[test]
    fn wrong_public_key_or_product_fails() {
        let config = ValidatorConfig::default();
        let (mut record, pk) = protected_record("s3cret", "acme-cad");
        let wrong_pk = ExpectedProtection {
            product_name: "acme-cad",
            public_key: "00",
        };
        assert!(matches!(
            unlock(&mut record, &PasswordFieldCipher, Some(wrong_pk), &config),
            Err(LicenseError::PasswordMismatch(_))
        ));

        let wrong_product = ExpectedProtection {
            product_name: "acme-viewer",
            public_key: &pk,
        };
        assert!(matches!(
            unlock(&mut record, &PasswordFieldCipher, Some(wrong_product), &config),
            Err(LicenseError::PasswordMismatch(_))
        ));
    }

    #[test]
    fn unprotected_key_passes_when_protection_expected() {
        let mut record = LicenseRecord::new("k");
        record.custom_key = Some("plain".into());
        let expected = ExpectedProtection {
            product_name: "acme-cad",
            public_key: "ab",
        };
        unlock(
            &mut record,
            &PasswordFieldCipher,
            Some(expected),
            &ValidatorConfig::default(),
        )
        .unwrap();
        assert_eq!(record.custom_key(), Some("plain"));
    }

    #[test]
    fn privileged_key_skips_comparison_but_still_decrypts() {
        let (mut record, _) = protected_record("MASTER", "acme-cad");
        record.privileged = true;
        let wrong = ExpectedProtection {
            product_name: "x",
            public_key: "y",
        };
        unlock(&mut record, &PasswordFieldCipher, Some(wrong), &ValidatorConfig::default())
            .unwrap();
        assert_eq!(record.custom_key(), Some("seat-42"));
        assert_eq!(record.options(), Some("pro,export"));

        let (mut record, _) = protected_record("MASTER", "acme-cad");
        record.privileged = true;
        unlock(&mut record, &PasswordFieldCipher, None, &ValidatorConfig::default()).unwrap();
        assert_eq!(record.custom_cookie(), Some("cookie-data"));
    }
}
