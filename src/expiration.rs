//! Expiration and grace evaluation.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::ValidatorConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::record::Warnings;

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_date(value: &str) -> LicenseResult<DateTime<Utc>> {
    let bytes = value.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return Err(LicenseError::malformed(format!(
            "date '{value}' is not YYYY-MM-DD"
        )));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| LicenseError::malformed(format!("invalid date '{value}'")))
}

/// Parse a millisecond Unix timestamp.
pub fn parse_millis(value: &str) -> LicenseResult<DateTime<Utc>> {
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| LicenseError::malformed(format!("invalid timestamp '{value}'")))
}

/// Requested grace as a duration; absurd requests are the caller's error.
fn grace_days(requested_days: i64) -> LicenseResult<Duration> {
    Duration::try_days(requested_days.max(0)).ok_or_else(|| {
        LicenseError::BadParams(format!("grace of {requested_days} days is out of range"))
    })
}

/// Grace actually granted after truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveGrace {
    pub grace: Duration,
    pub truncated: bool,
}

/// Cut the requested grace down to a quarter of the licensed span for
/// non-privileged keys that ask for more than the minimum.
pub fn effective_grace(
    expiration: DateTime<Utc>,
    issued: Option<DateTime<Utc>>,
    requested_days: i64,
    privileged: bool,
    config: &ValidatorConfig,
) -> LicenseResult<EffectiveGrace> {
    let requested = grace_days(requested_days)?;
    let untouched = EffectiveGrace {
        grace: requested,
        truncated: false,
    };

    if privileged || requested_days <= config.min_grace_days {
        return Ok(untouched);
    }
    let Some(issued) = issued else {
        return Ok(untouched);
    };

    let divisor = i32::try_from(config.grace_divisor).map_err(|_| {
        LicenseError::ConfigError(format!(
            "grace_divisor {} is out of range",
            config.grace_divisor
        ))
    })?;
    let max_grace = (expiration - issued) / divisor;
    Ok(if max_grace < requested {
        EffectiveGrace {
            grace: max_grace,
            truncated: true,
        }
    } else {
        untouched
    })
}

/// Evaluate an expiring key at `now`.
pub fn evaluate(
    now: DateTime<Utc>,
    expiration: DateTime<Utc>,
    issued: Option<DateTime<Utc>>,
    requested_days: i64,
    privileged: bool,
    config: &ValidatorConfig,
) -> LicenseResult<Warnings> {
    let mut warnings = Warnings::empty();
    let requested = grace_days(requested_days)?;

    if now <= expiration {
        if expiration - now < requested {
            warnings |= Warnings::GRACE_EXPIRATION;
        }
        return Ok(warnings);
    }

    let effective = effective_grace(expiration, issued, requested_days, privileged, config)?;
    if effective.truncated {
        log::debug!(
            "grace truncated from {} to {} seconds",
            requested.num_seconds(),
            effective.grace.num_seconds()
        );
        warnings |= Warnings::GRACE_EXP_TRUNCATED;
    }

    if now - expiration <= effective.grace {
        warnings |= Warnings::GRACE_EXP_ACTIVE;
        Ok(warnings)
    } else {
        Err(LicenseError::Expired(format!(
            "expired {} (grace {} days)",
            expiration.format("%Y-%m-%d"),
            effective.grace.num_days()
        )))
    }
}
