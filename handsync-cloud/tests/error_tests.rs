use handsync_cloud::SyncError;
use handsync_crypto::CryptoError;
use handsync_storage::StorageError;

#[test]
fn paused_is_distinguishable() {
    assert!(SyncError::Paused.is_paused());
    assert!(!SyncError::AuthRequired.is_paused());
    assert!(!SyncError::Paused.is_transient());
}

#[test]
fn rejected_display() {
    let err = SyncError::Rejected {
        endpoint: "/save".into(),
        status: 500,
    };
    assert_eq!(err.to_string(), "server rejected request to /save: HTTP 500");
}

#[test]
fn server_errors_are_transient() {
    let rejected = |status| SyncError::Rejected {
        endpoint: "/save".into(),
        status,
    };
    assert!(rejected(500).is_transient());
    assert!(rejected(503).is_transient());
    assert!(rejected(429).is_transient());
    assert!(!rejected(403).is_transient());
    assert!(!rejected(400).is_transient());
}

#[test]
fn io_errors_are_transient() {
    let err: SyncError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
    assert!(err.is_transient());
}

#[test]
fn protocol_errors_are_not_transient() {
    assert!(!SyncError::Protocol("bad range".into()).is_transient());
    assert!(!SyncError::InvalidState("no md5".into()).is_transient());
}

#[test]
fn wraps_lower_layers() {
    let err: SyncError = CryptoError::MalformedToken.into();
    assert!(err.to_string().starts_with("crypto error:"));

    let err: SyncError = StorageError::LockPoisoned("x".into()).into();
    assert!(err.to_string().starts_with("storage error:"));
}

#[test]
fn cycle_in_progress_display() {
    assert_eq!(
        SyncError::CycleInProgress.to_string(),
        "a sync cycle is already running"
    );
}
