//! Symmetric encryption utilities.
//!
//! AES-256-GCM with keys derived from text secrets. Shared by the reference
//! envelope codec and the reference protected-field cipher.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use rand::rngs::OsRng;
use rand::TryRngCore;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;

use ring::digest::{digest, SHA256};

use crate::errors::{LicenseError, LicenseResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Derive a 256-bit key from a text secret, separated by `context`.
///
///   key = SHA256(context || 0x00 || secret)
pub fn derive_key(context: &str, secret: &str) -> [u8; KEY_SIZE] {
    let mut material = Vec::with_capacity(context.len() + 1 + secret.len());
    material.extend_from_slice(context.as_bytes());
    material.push(0);
    material.extend_from_slice(secret.as_bytes());

    let hash = digest(&SHA256, &material);
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(hash.as_ref());
    key
}

/// Encrypt arbitrary bytes using AES-256-GCM.
///
/// Output format:
///   [nonce (12 bytes)] || [ciphertext+tag]
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> LicenseResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| LicenseError::EncryptionError(format!("nonce generation failed: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| LicenseError::EncryptionError(format!("encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.append(&mut ciphertext);

    Ok(output)
}

/// Decrypt bytes produced by `encrypt_bytes`.
pub fn decrypt_bytes(ciphertext: &[u8], key: &[u8; KEY_SIZE]) -> LicenseResult<Vec<u8>> {
    if ciphertext.len() <= NONCE_SIZE {
        return Err(LicenseError::DecryptionError(
            "ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, ct) = ciphertext.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(nonce, ct)
        .map_err(|e| LicenseError::DecryptionError(format!("decryption failed: {e}")))
}

/// Encrypt UTF-8 text and return URL-safe Base64.
pub fn encrypt_text(plaintext: &str, key: &[u8; KEY_SIZE]) -> LicenseResult<String> {
    let encrypted = encrypt_bytes(plaintext.as_bytes(), key)?;
    Ok(B64.encode(encrypted))
}

/// Decrypt text previously produced by `encrypt_text`.
pub fn decrypt_text(ciphertext_b64: &str, key: &[u8; KEY_SIZE]) -> LicenseResult<String> {
    let decoded = B64
        .decode(ciphertext_b64.trim())
        .map_err(|e| LicenseError::DecryptionError(format!("base64 decode failed: {e}")))?;
    let plain = decrypt_bytes(&decoded, key)?;
    String::from_utf8(plain)
        .map_err(|e| LicenseError::DecryptionError(format!("plaintext is not UTF-8: {e}")))
}
