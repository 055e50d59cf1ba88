//! Per-field validators.
//!
//! Every validator follows the same contract: reject a slot that is already
//! set, parse the value, check it against the model/type fixed so far, then
//! write the slot and update the mode flags. Any violation is a malformed
//! key, except limit overruns which are quota violations.

use chrono::{DateTime, Duration, Utc};

use crate::config::ValidatorConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::expiration::{parse_date, parse_millis};
use crate::keywords::FieldCode;
use crate::quota::{bounded_value_check, grace_allowance};
use crate::record::{set_once, Binding, LicenseRecord, LicenseType, ModeFlags, Model, Warnings};
use crate::tokenizer::Token;

/// How far an issue timestamp may lie ahead of the local clock.
const ISSUE_CLOCK_SKEW_HOURS: i64 = 6;

/// Caller inputs the fields are checked against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldContext<'a> {
    pub config: &'a ValidatorConfig,
    pub now: DateTime<Utc>,
    /// Metered usage to date
    pub usage: i64,
    /// Seats in use (users, CPUs, MHz... depending on the key type)
    pub concurrent: i64,
    /// Requested grace
    pub grace: i64,
}

fn parse_limit(code: FieldCode, value: &str) -> LicenseResult<i64> {
    match value.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(LicenseError::malformed(format!(
            "'{code}' must be a non-negative integer, got '{value}'"
        ))),
    }
}

fn parse_user_binding(value: &str) -> LicenseResult<Binding> {
    match value.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok(Binding::User {
            user: user.to_string(),
            host: Some(host.to_string()),
        }),
        Some(_) => Err(LicenseError::malformed(format!(
            "'usr' binding '{value}' is not user@host"
        ))),
        None => Ok(Binding::User {
            user: value.to_string(),
            host: None,
        }),
    }
}

fn conflict(code: FieldCode, why: &str) -> LicenseError {
    LicenseError::malformed(format!("'{code}' {why}"))
}

fn bind_once(record: &mut LicenseRecord, code: FieldCode, binding: Binding) -> LicenseResult<()> {
    if record.binding.is_some() {
        return Err(conflict(code, "conflicts with another identity binding"));
    }
    record.binding = Some(binding);
    Ok(())
}

/// Seat limits allow no overage.
fn check_seat_limit(
    record: &mut LicenseRecord,
    code: FieldCode,
    value: &str,
    ctx: &FieldContext<'_>,
) -> LicenseResult<()> {
    let limit = parse_limit(code, value)?;
    bounded_value_check(&mut record.usage_limit, limit, ctx.concurrent, 0, code)?;
    Ok(())
}

fn check_quota(
    record: &mut LicenseRecord,
    value: &str,
    ctx: &FieldContext<'_>,
) -> LicenseResult<Warnings> {
    let code = FieldCode::Quota;
    let limit = parse_limit(code, value)?;
    let grace = grace_allowance(limit, ctx.grace, record.privileged, ctx.config);
    bounded_value_check(&mut record.quota, limit, ctx.usage, grace.allowed_over, code)?;
    record.modes |= ModeFlags::METERED;
    if grace.truncated {
        log::debug!(
            "quota grace truncated from {} to {} (quota {})",
            ctx.grace,
            grace.allowed_over,
            limit
        );
    }
    Ok(if grace.truncated {
        Warnings::GRACE_QUOTA
    } else {
        Warnings::empty()
    })
}

/// Apply one token to the record.
pub(crate) fn apply_token(
    record: &mut LicenseRecord,
    token: &Token,
    ctx: &FieldContext<'_>,
) -> LicenseResult<Warnings> {
    let code = token.code;
    let value = token.value.as_str();

    match code {
        FieldCode::Expiration | FieldCode::ExpirationTs => {
            let expiration = if code == FieldCode::Expiration {
                parse_date(value)?
            } else {
                parse_millis(value)?
            };
            set_once(&mut record.expiration, expiration, code)?;
            record.modes |= ModeFlags::TIME;
        }
        FieldCode::IssueTs => {
            let issued = parse_millis(value)?;
            if ctx
                .now
                .checked_add_signed(Duration::hours(ISSUE_CLOCK_SKEW_HOURS))
                .is_some_and(|limit| issued > limit)
            {
                return Err(conflict(code, "lies in the future"));
            }
            set_once(&mut record.issued, issued, code)?;
        }

        FieldCode::User => {
            if record.model == Model::Server {
                return Err(conflict(code, "is not allowed on server keys"));
            }
            bind_once(record, code, parse_user_binding(value)?)?;
            record.model = Model::User;
            if record.license_type != LicenseType::UFloat {
                record.license_type = LicenseType::UUser;
            }
        }
        FieldCode::Host => bind_once(record, code, Binding::Host(value.to_string()))?,
        FieldCode::Network => bind_once(record, code, Binding::Network(value.to_string()))?,

        FieldCode::Floating => {
            if record.model == Model::Server {
                return Err(conflict(code, "is not allowed on server keys"));
            }
            check_seat_limit(record, code, value, ctx)?;
            record.model = Model::User;
            record.license_type = LicenseType::UFloat;
        }
        FieldCode::Concurrent | FieldCode::Cpu | FieldCode::Mhz | FieldCode::NamedUsers => {
            if record.model == Model::User {
                return Err(conflict(code, "is not allowed on user-model keys"));
            }
            check_seat_limit(record, code, value, ctx)?;
            record.model = Model::Server;
            record.license_type = LicenseType::for_server_field(code);
        }
        FieldCode::Quota => return check_quota(record, value, ctx),

        FieldCode::CustomKey => {
            set_once(&mut record.custom_key, value.to_string(), code)?;
            record.modes |= ModeFlags::CUSTOM_KEY;
        }
        FieldCode::CustomCookie => {
            set_once(&mut record.custom_cookie, value.to_string(), code)?;
            record.modes |= ModeFlags::CUSTOM_COOKIE;
        }
        FieldCode::Options => {
            set_once(&mut record.options, value.to_string(), code)?;
            record.modes |= ModeFlags::OPTIONS;
        }

        FieldCode::Checksum => {
            let sum = value
                .parse::<u64>()
                .map_err(|_| conflict(code, "must be a decimal integer"))?;
            set_once(&mut record.checksum, sum, code)?;
        }
        FieldCode::KeyVersion => {
            let version = value
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| conflict(code, "must be a positive integer"))?;
            set_once(&mut record.key_version, version, code)?;
        }
        FieldCode::ChainedKey => set_once(&mut record.chained_key_id, value.to_string(), code)?,
        FieldCode::AppPassword => set_once(&mut record.app_password, value.to_string(), code)?,
        FieldCode::Product => set_once(&mut record.product, value.to_string(), code)?,
        // Presence alone enforces identity checks; the value is not read.
        FieldCode::Enforce => set_once(&mut record.enforce, true, code)?,

        FieldCode::IssuedBy | FieldCode::IssuedWhen | FieldCode::Customer => {
            log::trace!("ignoring '{code}' annotation");
        }
    }

    Ok(Warnings::empty())
}

/// Fill in model and type.
pub(crate) fn finalize(record: &mut LicenseRecord) {
    record.derive_model();
}
