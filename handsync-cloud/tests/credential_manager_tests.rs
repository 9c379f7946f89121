use handsync_cloud::{Credential, CredentialManager, SyncError};
use std::sync::Arc;

const ALICE: &str = "alice:c40ee2212e0719723adff295a11dcc310d11edd2e7cbeba0da11957580e43338";

fn manager(dir: &tempfile::TempDir) -> CredentialManager {
    CredentialManager::new(dir.path().join("config").join("loginToken.txt"))
}

// ── Loading ──

#[tokio::test]
async fn missing_file_means_no_account() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    assert!(!creds.has_account().await);
    assert!(creds.username().await.is_none());
    assert!(matches!(
        creds.login_token().await,
        Err(SyncError::AuthRequired)
    ));
}

#[tokio::test]
async fn loads_existing_token_trimmed() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    std::fs::create_dir_all(creds.path().parent().unwrap()).unwrap();
    std::fs::write(creds.path(), format!("{ALICE}\n")).unwrap();

    assert_eq!(creds.username().await.as_deref(), Some("alice"));
    assert_eq!(creds.login_token().await.unwrap(), ALICE);
}

#[tokio::test]
async fn malformed_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    std::fs::create_dir_all(creds.path().parent().unwrap()).unwrap();
    std::fs::write(creds.path(), "no separator here").unwrap();

    assert!(!creds.has_account().await);
}

#[tokio::test]
async fn file_is_read_once() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    std::fs::create_dir_all(creds.path().parent().unwrap()).unwrap();
    std::fs::write(creds.path(), ALICE).unwrap();
    assert!(creds.has_account().await);

    // Later edits behind the manager's back are not picked up.
    std::fs::remove_file(creds.path()).unwrap();
    assert_eq!(creds.username().await.as_deref(), Some("alice"));
}

#[tokio::test]
async fn concurrent_first_readers_share_one_load() {
    let dir = tempfile::tempdir().unwrap();
    let creds = Arc::new(manager(&dir));
    std::fs::create_dir_all(creds.path().parent().unwrap()).unwrap();
    std::fs::write(creds.path(), ALICE).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let creds = Arc::clone(&creds);
        handles.push(tokio::spawn(async move { creds.current().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().login_token, ALICE);
    }
}

// ── Mutation ──

#[tokio::test]
async fn install_persists_and_activates() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    creds
        .install(Credential::from_token(ALICE).unwrap())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(creds.path()).unwrap(), ALICE);
    assert_eq!(creds.username().await.as_deref(), Some("alice"));
}

#[tokio::test]
async fn persist_leaves_active_credential_alone() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    creds
        .install(Credential::from_token(ALICE).unwrap())
        .await
        .unwrap();

    let bob = Credential::from_token("bob:1234").unwrap();
    creds.persist(&bob).await.unwrap();
    assert_eq!(creds.username().await.as_deref(), Some("alice"));
    assert_eq!(std::fs::read_to_string(creds.path()).unwrap(), "bob:1234");

    creds.activate(bob).await;
    assert_eq!(creds.username().await.as_deref(), Some("bob"));
}

#[tokio::test]
async fn logout_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let creds = manager(&dir);
    creds
        .install(Credential::from_token(ALICE).unwrap())
        .await
        .unwrap();

    creds.logout().await.unwrap();
    assert!(!creds.path().exists());
    assert!(!creds.has_account().await);

    // Logging out twice is fine.
    creds.logout().await.unwrap();
}

#[test]
fn credential_requires_separator() {
    assert!(matches!(
        Credential::from_token("nobody"),
        Err(SyncError::Crypto(_))
    ));
}
