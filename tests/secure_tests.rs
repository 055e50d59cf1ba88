mod common;

use chrono::Duration;
use serial_test::serial;

use common::{at, issue, request, validator};
use keyward::config::StorageConfig;
use keyward::watermark::{HighWaterMark, StoredWatermark};
use keyward::{LicenseError, SecureCheckRequest, Warnings};

const COOKIE_PASSWORD: &str = "cookie-secret";

fn metered_key(quota: &str) -> String {
    issue(&[("usr", "alice"), ("qta", quota)], true)
}

#[test]
fn consumption_accumulates_across_cookies() {
    let validator = validator();
    let key = metered_key("100");

    let first = validator
        .check_key_secure(&SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).consume(30))
        .unwrap();
    assert_eq!(first.quota_to_date, 30);
    assert!(first.warnings.is_empty());

    let second_req = SecureCheckRequest::new(
        request(&key).at(at(2030, 6, 2)).with_near_quota_threshold(20),
        COOKIE_PASSWORD,
    )
    .with_cookie(first.cookie)
    .consume(65);
    let second = validator.check_key_secure(&second_req).unwrap();
    assert_eq!(second.quota_to_date, 95);
    assert_eq!(second.warnings, Warnings::NEAR_QUOTA);
}

#[test]
fn overdraw_within_grace_then_violation() {
    let validator = validator();
    let key = metered_key("100");
    let base = || request(&key).with_grace_days(40);

    // 40 is cut to 100 / 4 = 25
    let within = validator
        .check_key_secure(&SecureCheckRequest::new(base(), COOKIE_PASSWORD).consume(120))
        .unwrap();
    assert!(within
        .warnings
        .contains(Warnings::OVER_QUOTA | Warnings::GRACE_QUOTA));
    assert_eq!(within.quota_to_date, 120);

    let past = SecureCheckRequest::new(base().at(at(2030, 6, 2)), COOKIE_PASSWORD)
        .with_cookie(within.cookie.clone())
        .consume(10);
    assert!(matches!(
        validator.check_key_secure(&past),
        Err(LicenseError::QuotaViolation { limit: 100, .. })
    ));
}

#[test]
fn small_grace_is_granted_as_asked() {
    let validator = validator();
    let key = metered_key("100");
    let base = || request(&key).with_grace_days(6);

    let within = validator
        .check_key_secure(&SecureCheckRequest::new(base(), COOKIE_PASSWORD).consume(106))
        .unwrap();
    assert_eq!(within.warnings, Warnings::OVER_QUOTA);

    assert!(matches!(
        validator.check_key_secure(&SecureCheckRequest::new(base(), COOKIE_PASSWORD).consume(107)),
        Err(LicenseError::QuotaViolation { allowed_over: 6, .. })
    ));
}

#[test]
fn read_only_check_reports_without_consuming() {
    let validator = validator();
    let key = metered_key("50");
    let first = validator
        .check_key_secure(&SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).consume(45))
        .unwrap();

    let peek = SecureCheckRequest::new(
        request(&key).with_near_quota_threshold(10),
        COOKIE_PASSWORD,
    )
    .with_cookie(first.cookie);
    let outcome = validator.check_key_secure(&peek).unwrap();
    assert_eq!(outcome.quota_to_date, 45);
    assert_eq!(outcome.warnings, Warnings::NEAR_QUOTA);
}

#[test]
fn app_state_is_carried_forward() {
    let validator = validator();
    let key = metered_key("10");
    let first = validator
        .check_key_secure(
            &SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).with_app_state("doc=7"),
        )
        .unwrap();

    let second = validator
        .check_key_secure(
            &SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).with_cookie(first.cookie),
        )
        .unwrap();
    assert_eq!(second.app_state.as_deref(), Some("doc=7"));
}

#[test]
fn forged_cookie_is_rejected() {
    let validator = validator();
    let key = metered_key("10");
    let first = validator
        .check_key_secure(&SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).consume(1))
        .unwrap();

    let wrong_password = SecureCheckRequest::new(request(&key), "other").with_cookie(first.cookie);
    assert!(matches!(
        validator.check_key_secure(&wrong_password),
        Err(LicenseError::CookieError(_))
    ));
}

#[test]
fn clock_rollback_is_detected_by_high_water_mark() {
    let validator = validator();
    let key = metered_key("100");
    validator
        .check_key_secure(
            &SecureCheckRequest::new(request(&key).at(at(2030, 6, 10)), COOKIE_PASSWORD).consume(1),
        )
        .unwrap();

    // Fresh cookie, but the mark remembers 2030-06-10.
    let rewound =
        SecureCheckRequest::new(request(&key).at(at(2030, 6, 5)), COOKIE_PASSWORD).consume(1);
    assert!(matches!(
        validator.check_key_secure(&rewound),
        Err(LicenseError::ClockTamper(_))
    ));
}

#[test]
#[serial]
fn stored_watermark_survives_validator_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        service: "keyward-test".to_string(),
        directory: Some(dir.path().to_path_buf()),
        use_keyring: false,
    };
    let key = metered_key("100");

    let first = validator().with_watermark(StoredWatermark::new(&storage, "embedded"));
    first
        .check_key_secure(&SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).consume(5))
        .unwrap();

    let store = StoredWatermark::new(&storage, "embedded");
    assert_eq!(
        store.read_high_water_mark(common::PRODUCT).unwrap(),
        Some(at(2030, 6, 1))
    );

    let restarted = validator().with_watermark(store);
    let mut rewound = request(&key);
    rewound.now -= Duration::hours(1);
    assert!(matches!(
        restarted.check_key_secure(&SecureCheckRequest::new(rewound, COOKIE_PASSWORD).consume(5)),
        Err(LicenseError::ClockTamper(_))
    ));
}

#[test]
#[serial]
fn cleanup_clears_stored_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        service: "keyward-test".to_string(),
        directory: Some(dir.path().to_path_buf()),
        use_keyring: false,
    };
    let key = metered_key("100");
    let validator = validator().with_watermark(StoredWatermark::new(&storage, "embedded"));

    let seed = validator
        .create_key_cookie_seed(common::PRODUCT, COOKIE_PASSWORD, Some("fresh-install"))
        .unwrap();
    let outcome = validator
        .check_key_secure(
            &SecureCheckRequest::new(request(&key), COOKIE_PASSWORD)
                .with_cookie(seed)
                .consume(5),
        )
        .unwrap();
    assert_eq!(
        validator
            .key_cookie_quota_to_date(&outcome.cookie, common::PRODUCT, COOKIE_PASSWORD)
            .unwrap(),
        5
    );
    assert_eq!(
        validator
            .key_cookie_app_state(&outcome.cookie, common::PRODUCT, COOKIE_PASSWORD)
            .unwrap()
            .as_deref(),
        Some("fresh-install")
    );
    assert_eq!(
        validator
            .key_cookie_ts(&outcome.cookie, common::PRODUCT, COOKIE_PASSWORD)
            .unwrap(),
        at(2030, 6, 1)
    );

    validator
        .cleanup_key_cookie(&outcome.cookie, common::PRODUCT, COOKIE_PASSWORD)
        .unwrap();
    let store = StoredWatermark::new(&storage, "embedded");
    assert_eq!(store.read_high_water_mark(common::PRODUCT).unwrap(), None);
}

#[test]
fn report_variant_carries_cookie_and_error() {
    let validator = validator();
    let key = metered_key("10");

    let granted = validator
        .check_key_secure_report(&SecureCheckRequest::new(request(&key), COOKIE_PASSWORD).consume(2));
    assert!(granted.is_granted());
    let cookie = granted.cookie.clone().unwrap();

    let denied = validator.check_key_secure_report(
        &SecureCheckRequest::new(request(&key).at(at(2030, 6, 2)), COOKIE_PASSWORD)
            .with_cookie(cookie.clone())
            .consume(50),
    );
    assert!(!denied.is_granted());
    assert_eq!(denied.cookie.as_deref(), Some(cookie.as_str()));
    assert!(matches!(
        denied.into_result(),
        Err(LicenseError::QuotaViolation { .. })
    ));
}
