use ledgersync_sync::{
    Disposition, OperationClass, RetryConfig, SyncConfig, SyncError,
};
use ledgersync_crypto::CryptoError;
use std::time::Duration;

#[test]
fn default_config() {
    let config = SyncConfig::default();
    assert_eq!(config.batch_size, 50);
    assert_eq!(config.timeout_ms, 30_000);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.idle_lock(), Some(Duration::from_secs(15 * 60)));
}

#[test]
fn config_loads_from_partial_json() {
    let config: SyncConfig =
        serde_json::from_str(r#"{"batch_size": 5, "retry": {"max_attempts": 2}}"#).unwrap();
    assert_eq!(config.batch_size, 5);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.retry.initial_delay_ms, 500);
    assert_eq!(config.rate_limits.key_derivation, 5);
}

#[test]
fn backoff_is_exponential_and_capped() {
    let retry = RetryConfig::default()
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_millis(1000))
        .with_jitter(false);

    assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
    assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(800));
    assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(1000));
}

#[test]
fn jitter_adds_at_most_a_quarter() {
    let retry = RetryConfig::default()
        .with_initial_delay(Duration::from_millis(400))
        .with_jitter(true);
    for _ in 0..50 {
        let d = retry.delay_for_attempt(1);
        assert!(d >= Duration::from_millis(400));
        assert!(d <= Duration::from_millis(500));
    }
}

#[test]
fn error_dispositions() {
    let rate_limited = SyncError::RateLimited {
        class: OperationClass::KeyDerivation,
        retry_after: Duration::from_secs(3),
    };
    assert_eq!(rate_limited.disposition(), Disposition::RetryLater);
    assert_eq!(
        SyncError::TransportFailure("down".into()).disposition(),
        Disposition::RetryLater
    );
    assert_eq!(SyncError::DecryptionFailed.disposition(), Disposition::Permanent);
    assert_eq!(
        SyncError::ConstraintViolation("unbalanced".into()).disposition(),
        Disposition::FixInput
    );
    assert_eq!(SyncError::Locked.disposition(), Disposition::FixInput);
}

#[test]
fn decryption_failure_has_friendly_message() {
    assert_eq!(
        SyncError::DecryptionFailed.user_message(),
        "couldn't sync that change"
    );
}

#[test]
fn crypto_errors_map_onto_sync_errors() {
    assert!(matches!(
        SyncError::from(CryptoError::DecryptionFailed),
        SyncError::DecryptionFailed
    ));
    assert!(matches!(SyncError::from(CryptoError::Locked), SyncError::Locked));
    assert!(matches!(
        SyncError::from(CryptoError::UnsupportedKdfVersion(7)),
        SyncError::Crypto(_)
    ));
}
