//! Tamper-evident high-water mark for clock-rollback detection.
//!
//! The mark is the latest timestamp the validator has seen for a scope
//! (usually the product id). It only moves forwards.
//!
//! ## Storage Locations
//!
//! [`StoredWatermark`] keeps an HMAC-tagged record:
//!
//! **Keyring (Primary):**
//! - Service: `keyward` (configurable)
//! - Keys: `hwm:{scope}`
//!
//! **File Fallback (Secondary):**
//! - Windows: `%APPDATA%\keyward\`
//! - macOS: `~/Library/Application Support/keyward/`
//! - Linux: `~/.local/share/keyward/`
//!
//! Only a missing keyring entry falls through to the file. Any other keyring
//! failure is returned to the caller.
//!
//! Concurrent validations against the same scope need the caller to
//! serialise them; the store does not lock across processes.

use chrono::{DateTime, Utc};
use ring::hmac;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::StorageConfig;
use crate::encryption::derive_key;
use crate::errors::{LicenseError, LicenseResult};

/// Monotonic timestamp store.
pub trait HighWaterMark {
    fn read_high_water_mark(&self, scope: &str) -> LicenseResult<Option<DateTime<Utc>>>;

    /// Raise the mark to `ts`. A mark already at or past `ts` is kept.
    fn advance_high_water_mark(&self, scope: &str, ts: DateTime<Utc>) -> LicenseResult<()>;

    /// Forget the scope's mark entirely.
    fn clear_high_water_mark(&self, scope: &str) -> LicenseResult<()>;
}

/// In-process store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryWatermark {
    marks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryWatermark {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HighWaterMark for MemoryWatermark {
    fn read_high_water_mark(&self, scope: &str) -> LicenseResult<Option<DateTime<Utc>>> {
        let marks = self.marks.lock().unwrap_or_else(|p| p.into_inner());
        Ok(marks.get(scope).copied())
    }

    fn advance_high_water_mark(&self, scope: &str, ts: DateTime<Utc>) -> LicenseResult<()> {
        let mut marks = self.marks.lock().unwrap_or_else(|p| p.into_inner());
        let entry = marks.entry(scope.to_string()).or_insert(ts);
        if *entry < ts {
            *entry = ts;
        }
        Ok(())
    }

    fn clear_high_water_mark(&self, scope: &str) -> LicenseResult<()> {
        let mut marks = self.marks.lock().unwrap_or_else(|p| p.into_inner());
        marks.remove(scope);
        Ok(())
    }
}

/// Keyring-backed store with a file fallback.
#[derive(Debug, Clone)]
pub struct StoredWatermark {
    service: String,
    directory: Option<PathBuf>,
    use_keyring: bool,
    secret: String,
}

impl StoredWatermark {
    /// `secret` keys the HMAC over stored marks; use something the
    /// application embeds, not something the user can read from disk.
    pub fn new(config: &StorageConfig, secret: impl Into<String>) -> Self {
        Self {
            service: config.service.clone(),
            directory: config.directory.clone(),
            use_keyring: config.use_keyring,
            secret: secret.into(),
        }
    }

    fn keyring_name(scope: &str) -> String {
        format!("hwm:{scope}")
    }

    fn filename(scope: &str) -> String {
        let safe: String = scope
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{safe}.hwm")
    }

    fn storage_dir(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join(&self.service)))
    }

    fn storage_path(&self, scope: &str) -> LicenseResult<PathBuf> {
        self.storage_dir()
            .map(|dir| dir.join(Self::filename(scope)))
            .ok_or_else(|| {
                LicenseError::StorageError(std::io::Error::new(
                    ErrorKind::NotFound,
                    "Could not determine app data directory",
                ))
            })
    }

    fn tag_key(&self, scope: &str) -> hmac::Key {
        let secret = format!("{}\0{}", scope, self.secret);
        hmac::Key::new(hmac::HMAC_SHA256, &derive_key("keyward-hwm-v1", &secret))
    }

    fn encode_record(&self, scope: &str, ts: DateTime<Utc>) -> String {
        let millis = ts.timestamp_millis().to_string();
        let tag = hmac::sign(&self.tag_key(scope), millis.as_bytes());
        format!("{}.{}", millis, hex::encode(tag.as_ref()))
    }

    fn decode_record(&self, scope: &str, record: &str) -> LicenseResult<DateTime<Utc>> {
        let altered = || LicenseError::ClockTamper(format!("stored mark for '{scope}' was altered"));

        let (millis, tag_hex) = record.trim().split_once('.').ok_or_else(altered)?;
        let tag = hex::decode(tag_hex).map_err(|_| altered())?;
        hmac::verify(&self.tag_key(scope), millis.as_bytes(), &tag).map_err(|_| altered())?;

        millis
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(altered)
    }

    // === Keyring Operations ===

    fn load_from_keyring(&self, scope: &str) -> Result<String, keyring::Error> {
        keyring::Entry::new(&self.service, &Self::keyring_name(scope))?.get_password()
    }

    fn save_to_keyring(&self, scope: &str, data: &str) -> Result<(), keyring::Error> {
        keyring::Entry::new(&self.service, &Self::keyring_name(scope))?.set_password(data)
    }

    // === File Operations ===

    fn load_from_file(&self, scope: &str) -> LicenseResult<Option<String>> {
        match fs::read_to_string(self.storage_path(scope)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LicenseError::StorageError(e)),
        }
    }

    fn save_to_file(&self, scope: &str, data: &str) -> LicenseResult<()> {
        let path = self.storage_path(scope)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn load(&self, scope: &str) -> LicenseResult<Option<String>> {
        if self.use_keyring {
            match self.load_from_keyring(scope) {
                Ok(data) => {
                    log::debug!("Loaded high-water mark '{}' from keyring", scope);
                    return Ok(Some(data));
                }
                Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    log::warn!("Keyring load failed for '{}': {}", scope, e);
                    return Err(e.into());
                }
            }
        }
        self.load_from_file(scope)
    }

    fn save(&self, scope: &str, data: &str) -> LicenseResult<()> {
        if self.use_keyring {
            self.save_to_keyring(scope, data)?;
            // Verify the save worked by reading back
            if self.load_from_keyring(scope).is_ok() {
                log::debug!("Saved high-water mark '{}' to keyring", scope);
                return Ok(());
            }
            log::debug!(
                "Keyring save verification failed for '{}', falling back to file",
                scope
            );
        }
        self.save_to_file(scope, data)?;
        log::debug!("Saved high-water mark '{}' to app data directory", scope);
        Ok(())
    }

    /// Remove a scope's mark from every location.
    pub fn clear(&self, scope: &str) -> LicenseResult<()> {
        if self.use_keyring {
            let entry = keyring::Entry::new(&self.service, &Self::keyring_name(scope))?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            }
        }
        match fs::remove_file(self.storage_path(scope)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::StorageError(e)),
        }
    }
}

impl HighWaterMark for StoredWatermark {
    fn read_high_water_mark(&self, scope: &str) -> LicenseResult<Option<DateTime<Utc>>> {
        match self.load(scope)? {
            Some(record) => self.decode_record(scope, &record).map(Some),
            None => Ok(None),
        }
    }

    fn advance_high_water_mark(&self, scope: &str, ts: DateTime<Utc>) -> LicenseResult<()> {
        if let Some(current) = self.read_high_water_mark(scope)? {
            if current >= ts {
                return Ok(());
            }
        }
        self.save(scope, &self.encode_record(scope, ts))
    }

    fn clear_high_water_mark(&self, scope: &str) -> LicenseResult<()> {
        self.clear(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serial_test::serial;

    fn file_store(dir: &tempfile::TempDir) -> StoredWatermark {
        let config = StorageConfig {
            service: "keyward-test".to_string(),
            directory: Some(dir.path().to_path_buf()),
            use_keyring: false,
        };
        StoredWatermark::new(&config, "embedded-secret")
    }

    #[test]
    fn memory_mark_only_moves_forward() {
        let store = MemoryWatermark::new();
        let now = Utc::now();
        assert_eq!(store.read_high_water_mark("p").unwrap(), None);
        store.advance_high_water_mark("p", now).unwrap();
        store
            .advance_high_water_mark("p", now - Duration::hours(1))
            .unwrap();
        assert_eq!(store.read_high_water_mark("p").unwrap(), Some(now));

        store.clear_high_water_mark("p").unwrap();
        assert_eq!(store.read_high_water_mark("p").unwrap(), None);
    }

    #[test]
    #[serial]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        let ts = DateTime::<Utc>::from_timestamp_millis(1_900_000_000_123).unwrap();

        assert_eq!(store.read_high_water_mark("acme/cad").unwrap(), None);
        store.advance_high_water_mark("acme/cad", ts).unwrap();
        assert_eq!(store.read_high_water_mark("acme/cad").unwrap(), Some(ts));
        assert!(dir.path().join("acme_cad.hwm").exists());

        store
            .advance_high_water_mark("acme/cad", ts - Duration::days(1))
            .unwrap();
        assert_eq!(store.read_high_water_mark("acme/cad").unwrap(), Some(ts));

        store.clear("acme/cad").unwrap();
        assert_eq!(store.read_high_water_mark("acme/cad").unwrap(), None);
    }

    #[test]
    #[serial]
    fn edited_file_is_clock_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        let ts = DateTime::<Utc>::from_timestamp_millis(1_900_000_000_000).unwrap();
        store.advance_high_water_mark("acme", ts).unwrap();

        let path = dir.path().join("acme.hwm");
        let record = fs::read_to_string(&path).unwrap();
        let (_, tag) = record.split_once('.').unwrap();
        fs::write(&path, format!("1000000000000.{tag}")).unwrap();

        assert!(matches!(
            store.read_high_water_mark("acme"),
            Err(LicenseError::ClockTamper(_))
        ));
    }

    #[test]
    fn different_secret_cannot_read_mark() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        store.advance_high_water_mark("acme", Utc::now()).unwrap();

        let other = StoredWatermark::new(
            &StorageConfig {
                service: "keyward-test".to_string(),
                directory: Some(dir.path().to_path_buf()),
                use_keyring: false,
            },
            "another-secret",
        );
        assert!(other.read_high_water_mark("acme").is_err());
    }
}
