//! Metered quota and seat-limit evaluation.

use crate::config::ValidatorConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::keywords::FieldCode;
use crate::record::Warnings;

/// How far usage may run past a quota before the check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGrace {
    pub allowed_over: i64,
    /// The caller asked for more than the key allows
    pub truncated: bool,
}

impl QuotaGrace {
    pub const NONE: QuotaGrace = QuotaGrace {
        allowed_over: 0,
        truncated: false,
    };

    fn warnings(self) -> Warnings {
        if self.truncated {
            Warnings::GRACE_QUOTA
        } else {
            Warnings::empty()
        }
    }
}

/// Grant the requested grace, capped at `limit / grace_divisor` for
/// ordinary keys that ask for more than the configured minimum.
pub fn grace_allowance(
    limit: i64,
    requested: i64,
    privileged: bool,
    config: &ValidatorConfig,
) -> QuotaGrace {
    let requested = requested.max(0);
    let cap = limit.checked_div(config.grace_divisor).unwrap_or(0);
    if !privileged && requested > config.min_grace_days && requested > cap {
        QuotaGrace {
            allowed_over: cap,
            truncated: true,
        }
    } else {
        QuotaGrace {
            allowed_over: requested,
            truncated: false,
        }
    }
}

/// Store a limit field after checking the caller's current counter.
///
/// Returns whether `current` is over the limit (but within `allowed_over`).
pub fn bounded_value_check(
    slot: &mut Option<i64>,
    limit: i64,
    current: i64,
    allowed_over: i64,
    code: FieldCode,
) -> LicenseResult<bool> {
    if slot.is_some() {
        return Err(LicenseError::malformed(format!("duplicate '{code}' field")));
    }
    if current.saturating_sub(limit) > allowed_over {
        return Err(LicenseError::QuotaViolation {
            limit,
            current,
            allowed_over,
        });
    }
    *slot = Some(limit);
    Ok(current > limit)
}

/// Evaluate caller-reported usage against the quota.
pub fn evaluate(
    quota: i64,
    usage: i64,
    near_threshold: i64,
    grace: QuotaGrace,
) -> LicenseResult<Warnings> {
    let mut warnings = grace.warnings();

    if usage > quota {
        if usage.saturating_sub(quota) > grace.allowed_over {
            return Err(LicenseError::QuotaViolation {
                limit: quota,
                current: usage,
                allowed_over: grace.allowed_over,
            });
        }
        warnings |= Warnings::OVER_QUOTA;
    } else if quota - usage <= near_threshold {
        warnings |= Warnings::NEAR_QUOTA;
    }

    Ok(warnings)
}

/// Outcome of an incremental quota step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStep {
    pub warnings: Warnings,
    /// Running consumption to persist
    pub quota_to_date: i64,
}

/// Apply one usage increment to a running total.
///
/// Consumption is expressed as a negative `increment`; the remaining quota
/// after this call is `quota - quota_to_date + increment`.
pub fn evaluate_incremental(
    quota: i64,
    quota_to_date: i64,
    increment: i64,
    near_threshold: i64,
    grace: QuotaGrace,
) -> LicenseResult<QuotaStep> {
    let remaining = quota
        .saturating_sub(quota_to_date)
        .saturating_add(increment);
    let mut warnings = grace.warnings();

    if remaining >= 0 {
        if remaining <= near_threshold {
            warnings |= Warnings::NEAR_QUOTA;
        }
    } else {
        if remaining.saturating_neg() > grace.allowed_over {
            return Err(LicenseError::QuotaViolation {
                limit: quota,
                current: quota_to_date.saturating_sub(increment),
                allowed_over: grace.allowed_over,
            });
        }
        warnings |= Warnings::OVER_QUOTA;
    }

    Ok(QuotaStep {
        warnings,
        quota_to_date: advance_total(quota_to_date, increment),
    })
}

/// Running total after `increment`; only consumption moves it.
pub fn advance_total(quota_to_date: i64, increment: i64) -> i64 {
    if increment < 0 {
        quota_to_date.saturating_sub(increment)
    } else {
        quota_to_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grace(allowed_over: i64) -> QuotaGrace {
        QuotaGrace {
            allowed_over,
            truncated: false,
        }
    }

    #[test]
    fn requested_grace_is_capped_at_a_quarter() {
        let config = ValidatorConfig::default();
        assert_eq!(grace_allowance(1000, 5, false, &config), grace(5));
        assert_eq!(grace_allowance(1000, 6, false, &config), grace(6));
        assert_eq!(
            grace_allowance(1000, 400, false, &config),
            QuotaGrace {
                allowed_over: 250,
                truncated: true
            }
        );
        assert_eq!(grace_allowance(1000, 400, true, &config), grace(400));
        assert_eq!(grace_allowance(1000, -3, false, &config), grace(0));
    }

    #[test]
    fn small_quota_keeps_small_requests() {
        // quota/4 is 1, but a request of 5 or less is never cut
        let config = ValidatorConfig::default();
        assert_eq!(grace_allowance(4, 5, false, &config), grace(5));
        assert!(grace_allowance(4, 6, false, &config).truncated);
    }

    #[test]
    fn exact_quota_without_threshold_has_no_warning() {
        assert_eq!(evaluate(1000, 999, 0, QuotaGrace::NONE).unwrap(), Warnings::empty());
        assert_eq!(evaluate(1000, 1000, -1, QuotaGrace::NONE).unwrap(), Warnings::empty());
    }

    #[test]
    fn one_over_needs_grace() {
        assert!(matches!(
            evaluate(1000, 1001, 0, QuotaGrace::NONE),
            Err(LicenseError::QuotaViolation { .. })
        ));
        assert_eq!(evaluate(1000, 1001, 0, grace(5)).unwrap(), Warnings::OVER_QUOTA);
    }

    #[test]
    fn grace_boundary() {
        assert_eq!(evaluate(1000, 1006, 0, grace(6)).unwrap(), Warnings::OVER_QUOTA);
        assert!(evaluate(1000, 1007, 0, grace(6)).is_err());
    }

    #[test]
    fn truncation_is_reported_even_under_quota() {
        let cut = QuotaGrace {
            allowed_over: 25,
            truncated: true,
        };
        assert_eq!(evaluate(100, 10, 0, cut).unwrap(), Warnings::GRACE_QUOTA);
    }

    #[test]
    fn near_quota_threshold_is_inclusive() {
        assert_eq!(evaluate(100, 90, 10, QuotaGrace::NONE).unwrap(), Warnings::NEAR_QUOTA);
        assert_eq!(evaluate(100, 89, 10, QuotaGrace::NONE).unwrap(), Warnings::empty());

        let step = evaluate_incremental(100, 80, -10, 10, QuotaGrace::NONE).unwrap();
        assert_eq!(step.warnings, Warnings::NEAR_QUOTA);
        let step = evaluate_incremental(100, 79, -10, 10, QuotaGrace::NONE).unwrap();
        assert!(step.warnings.is_empty());
    }

    #[test]
    fn bounded_check_stores_and_flags_overrun() {
        let mut slot = None;
        assert!(!bounded_value_check(&mut slot, 5, 5, 0, FieldCode::Concurrent).unwrap());
        assert_eq!(slot, Some(5));

        let mut slot = None;
        assert!(bounded_value_check(&mut slot, 8, 9, 2, FieldCode::Quota).unwrap());

        let mut slot = None;
        assert!(bounded_value_check(&mut slot, 8, 11, 2, FieldCode::Quota).is_err());
        assert_eq!(slot, None);
    }

    #[test]
    fn incremental_consumption() {
        let step = evaluate_incremental(100, 10, -20, 0, QuotaGrace::NONE).unwrap();
        assert_eq!(step.quota_to_date, 30);
        assert!(step.warnings.is_empty());

        let step = evaluate_incremental(100, 100, -20, 0, grace(25)).unwrap();
        assert_eq!(step.quota_to_date, 120);
        assert_eq!(step.warnings, Warnings::OVER_QUOTA);

        assert!(matches!(
            evaluate_incremental(100, 100, -30, 0, grace(25)),
            Err(LicenseError::QuotaViolation { current: 130, .. })
        ));
    }

    #[test]
    fn non_negative_increment_leaves_total() {
        assert_eq!(advance_total(40, 0), 40);
        assert_eq!(advance_total(40, 5), 40);
        assert_eq!(advance_total(40, -5), 45);
        let step = evaluate_incremental(100, 40, 5, 0, QuotaGrace::NONE).unwrap();
        assert_eq!(step.quota_to_date, 40);
    }
}
