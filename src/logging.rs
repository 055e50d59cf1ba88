//! Logging setup and license audit events.
//!
//! The library logs through the `log` facade. Applications that do not bring
//! their own logger can call [`init_logging`] with the loaded
//! [`LoggingConfig`].

use log::LevelFilter;
use ring::digest::{digest, SHA256};

use crate::config::LoggingConfig;

/// License check event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// Key validated successfully
    Checked,
    /// Key validation failed
    CheckFailed,
    /// Expired key accepted within its grace window
    GraceActive,
    /// Over-quota usage accepted within its grace allowance
    QuotaGrace,
    /// A fresh usage cookie was issued
    CookieIssued,
    /// Stored usage timestamp is ahead of the clock
    ClockRollback,
}

impl std::fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseEvent::Checked => "checked",
            LicenseEvent::CheckFailed => "check_failed",
            LicenseEvent::GraceActive => "grace_active",
            LicenseEvent::QuotaGrace => "quota_grace",
            LicenseEvent::CookieIssued => "cookie_issued",
            LicenseEvent::ClockRollback => "clock_rollback",
        };
        write!(f, "{}", s)
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Install an `env_logger` backend at the configured level.
///
/// Does nothing when logging is disabled or another logger is already set.
pub fn init_logging(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let _ = env_logger::Builder::new()
        .filter_level(parse_level(&config.level))
        .format_timestamp_millis()
        .try_init();
}

/// Short, non-reversible identifier for a key, safe to put in logs.
pub fn key_fingerprint(raw_key: &str) -> String {
    let hash = digest(&SHA256, raw_key.trim().as_bytes());
    hex::encode(&hash.as_ref()[..6])
}

/// Log a license check event.
///
/// Failures are logged at `warn`, everything else at `info`.
pub fn log_license_event(event: LicenseEvent, key_id: &str, details: Option<&str>) {
    let details = details.unwrap_or("");
    match event {
        LicenseEvent::CheckFailed | LicenseEvent::ClockRollback => {
            log::warn!(target: "keyward::audit", "event={} key={} {}", event, key_id, details)
        }
        _ => log::info!(target: "keyward::audit", "event={} key={} {}", event, key_id, details),
    }
}
