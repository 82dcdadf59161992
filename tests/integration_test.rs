//! Integration tests for the tipbot daemon
//!
//! These exercise the public API end to end: license lifecycle, payment
//! handshake, and session restore with a real relay client process.

use std::sync::Arc;
use tempfile::TempDir;
use tipbot::license::LicenseManager;
use tipbot::payment;
use tipbot::relay::ProcessConnector;
use tipbot::sessions::{normalize_phone, SessionRegistry};
use tipbot::supervisor::SessionSupervisor;
use tipbot::users::{Plan, UserStatus, UserStore};

fn licenses_in(temp: &TempDir) -> LicenseManager {
    let mut store = UserStore::new(&temp.path().join("users.json"));
    store.load().unwrap();
    LicenseManager::new(store)
}

/// Full user lifecycle: register, request a plan, activate, verify access.
#[tokio::test]
async fn test_payment_to_activation_flow() {
    let temp = TempDir::new().unwrap();
    let mut licenses = licenses_in(&temp);

    licenses.register_new_user("42").await.unwrap();
    assert_eq!(licenses.status_of("42"), Some(UserStatus::Unregistered));
    assert!(!licenses.check_access("42"));

    // User requests a week from the button interface
    let ticket = payment::request_payment(&mut licenses, "42", Plan::Week, None)
        .await
        .unwrap();
    assert_eq!(ticket.plan, Plan::Week);
    assert_eq!(
        licenses.status_of("42"),
        Some(UserStatus::PaymentRequested)
    );

    // Admin activates the matching plan
    let (key, expires) = licenses.activate("42", Plan::Week).await.unwrap();
    assert!(key.starts_with("TIP-"));
    assert!(licenses.check_access("42"));

    let now = chrono::Utc::now();
    assert!(expires > now + chrono::Duration::days(6));
    assert!(expires < now + chrono::Duration::days(8));

    // Pending-request fields were cleared by the activation
    let record = licenses.info_of("42").unwrap();
    assert!(record.requested_plan.is_none());
    assert!(record.payment_requested_at.is_none());
}

/// A lapsed license flips to no-access purely from stored data and the
/// clock; nothing mutates the record.
#[tokio::test]
async fn test_expired_license_detected_lazily() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("users.json");

    // Persisted snapshot of a user whose license expired a second ago
    let snapshot = serde_json::json!({
        "42": {
            "user_id": "42",
            "status": "active",
            "plan": "semaine",
            "license_key": "TIP-00FF00FF00FF00FF",
            "expires_at": chrono::Utc::now() - chrono::Duration::seconds(1),
            "created_at": chrono::Utc::now() - chrono::Duration::days(8),
            "updated_at": chrono::Utc::now() - chrono::Duration::days(8)
        }
    });
    std::fs::create_dir_all(temp.path()).unwrap();
    std::fs::write(&path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();

    let mut store = UserStore::new(&path);
    store.load().unwrap();
    let licenses = LicenseManager::new(store);

    assert!(!licenses.check_access("42"));
    assert_eq!(licenses.status_of("42"), Some(UserStatus::Expired));
    // Stored record still says active
    assert_eq!(licenses.info_of("42").unwrap().status, UserStatus::Active);
}

/// Last-write-wins for competing payment requests.
#[tokio::test]
async fn test_payment_request_last_write_wins() {
    let temp = TempDir::new().unwrap();
    let mut licenses = licenses_in(&temp);

    payment::request_payment(&mut licenses, "42", Plan::Month, None)
        .await
        .unwrap();
    assert!(
        payment::request_payment(&mut licenses, "42", Plan::Month, None)
            .await
            .is_err()
    );
    payment::request_payment(&mut licenses, "42", Plan::Week, None)
        .await
        .unwrap();

    assert_eq!(
        licenses.info_of("42").unwrap().requested_plan,
        Some(Plan::Week)
    );

    payment::cancel_payment(&mut licenses, "42").await.unwrap();
    assert_eq!(licenses.status_of("42"), Some(UserStatus::Inactive));
}

/// Registry state survives a reload, like a process restart would see it.
#[tokio::test]
async fn test_registry_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sessions.json");

    let mut registry = SessionRegistry::new(&path);
    registry.register("+33 6 12 34 56 78", true).await.unwrap();
    registry.register("22997000000", false).await.unwrap();

    let mut registry2 = SessionRegistry::new(&path);
    assert_eq!(registry2.load().unwrap(), 2);
    assert_eq!(
        registry2.connected_phones(),
        vec!["33612345678".to_string()]
    );
    assert!(registry2.get("33612345678").unwrap().connected);
    assert!(!registry2.get("22997000000").unwrap().connected);
}

/// Restore with the real process connector: a live client script restores,
/// a phone with no credential artifact fails without aborting the pass, and
/// a second pass is a no-op for the already-live session.
#[tokio::test]
#[cfg(unix)]
async fn test_restore_with_process_connector() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let credentials_dir = temp.path().join("credentials");
    std::fs::create_dir_all(&credentials_dir).unwrap();

    // Fake relay client that stays up
    let client = temp.path().join("fake-relay.sh");
    std::fs::write(&client, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&client, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut registry = SessionRegistry::new(&temp.path().join("sessions.json"));
    registry.register("33700000001", true).await.unwrap();
    registry.register("33700000002", true).await.unwrap();

    // Only the first phone has a credential artifact
    std::fs::write(
        credentials_dir.join("relay_33700000001.session"),
        "credential-bytes",
    )
    .unwrap();

    let connector = Arc::new(ProcessConnector::new(client));
    let mut supervisor = SessionSupervisor::new(registry, connector, credentials_dir);

    let report = supervisor.restore_all().await;
    assert_eq!(report.restored, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(supervisor.live_count(), 1);
    assert!(supervisor.is_active());

    // The failed phone was flipped to disconnected
    assert!(!supervisor.registry().get("33700000002").unwrap().connected);

    // Second pass: idempotent, the live session is not reopened
    let report = supervisor.restore_all().await;
    assert_eq!(report.restored, 0);
    assert_eq!(report.already_live, 1);

    // Bounded teardown leaves the persisted flag for the next boot
    supervisor
        .teardown_all(std::time::Duration::from_secs(2))
        .await;
    assert_eq!(supervisor.live_count(), 0);
    assert!(supervisor.registry().get("33700000001").unwrap().connected);
}

/// Cleanup deletes descriptors and their credential artifacts.
#[tokio::test]
async fn test_cleanup_removes_artifacts() {
    let temp = TempDir::new().unwrap();
    let credentials_dir = temp.path().join("credentials");
    std::fs::create_dir_all(&credentials_dir).unwrap();

    let mut registry = SessionRegistry::new(&temp.path().join("sessions.json"));
    registry.register("33700000001", false).await.unwrap();
    let artifact = credentials_dir.join("relay_33700000001.session");
    std::fs::write(&artifact, "credential-bytes").unwrap();

    let connector = Arc::new(ProcessConnector::new("/bin/true".into()));
    let mut supervisor = SessionSupervisor::new(registry, connector, credentials_dir);

    let report = supervisor.cleanup().await.unwrap();
    assert_eq!(report.sessions_removed, 1);
    assert_eq!(report.artifacts_deleted, 1);
    assert!(!artifact.exists());
    assert!(supervisor.registry().is_empty());
}

/// Phone normalization edge cases across the public boundary.
#[test]
fn test_phone_normalization_comprehensive() {
    assert_eq!(normalize_phone("+33612345678").unwrap(), "33612345678");
    assert_eq!(normalize_phone("33612345678").unwrap(), "33612345678");
    assert_eq!(normalize_phone("+229 97 00 00 00").unwrap(), "22997000000");
    assert_eq!(normalize_phone("(617) 555-1234").unwrap(), "6175551234");
    assert_eq!(normalize_phone("617.555.1234").unwrap(), "6175551234");

    assert!(normalize_phone("no digits here").is_err());
    assert!(normalize_phone("").is_err());
}
