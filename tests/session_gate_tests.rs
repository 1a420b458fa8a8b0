//! Session persistence and access-gate integration tests: the durable session
//! slot feeding gate decisions the way the CLI and server consume them.

use anyhow::Result;
use tempfile::tempdir;

use smartnest::auth::{
    evaluate_access, landing_path, login_path, AccessDecision, Role, SessionStore, UserRecord,
};

fn user(role: Role) -> UserRecord {
    UserRecord {
        email: "a@x.com".to_string(),
        password: "p".to_string(),
        name: "Alice".to_string(),
        role,
    }
}

#[tokio::test]
async fn fresh_slot_denies_everything_to_login() -> Result<()> {
    let tmp = tempdir()?;
    let session = SessionStore::file(tmp.path().join("session.json"));
    let state = session.load();
    assert!(!state.is_authenticated);
    assert_eq!(evaluate_access(&state, None), AccessDecision::DenyToLogin);
    assert_eq!(evaluate_access(&state, Some(Role::Admin)), AccessDecision::DenyToLogin);
    Ok(())
}

#[tokio::test]
async fn saved_session_grants_across_reopen() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("session.json");
    SessionStore::file(&path).save(user(Role::Admin), "u1".to_string());

    // A second store over the same file sees the login (new process analog)
    let state = SessionStore::file(&path).load();
    assert!(state.is_authenticated);
    assert_eq!(evaluate_access(&state, Some(Role::Admin)), AccessDecision::Grant);
    assert_eq!(evaluate_access(&state, None), AccessDecision::Grant);
    Ok(())
}

#[tokio::test]
async fn wrong_role_is_sent_to_own_landing_not_login() -> Result<()> {
    let tmp = tempdir()?;
    let session = SessionStore::file(tmp.path().join("session.json"));
    session.save(user(Role::User), "u1".to_string());

    match evaluate_access(&session.load(), Some(Role::Admin)) {
        AccessDecision::DenyToLanding(role) => {
            assert_eq!(role, Role::User);
            assert_eq!(landing_path(role), "/dashboard");
        }
        other => panic!("expected DenyToLanding, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn clear_logs_out_and_removes_the_slot() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("session.json");
    let session = SessionStore::file(&path);
    session.save(user(Role::User), "u1".to_string());
    assert!(path.exists());

    session.clear();
    assert!(!path.exists());
    assert_eq!(evaluate_access(&session.load(), None), AccessDecision::DenyToLogin);
    Ok(())
}

#[tokio::test]
async fn corrupt_slot_fails_open_to_logged_out() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("session.json");
    std::fs::write(&path, "{not json at all")?;

    let state = SessionStore::file(&path).load();
    assert!(!state.is_authenticated);
    assert_eq!(evaluate_access(&state, Some(Role::User)), AccessDecision::DenyToLogin);
    Ok(())
}

#[tokio::test]
async fn hand_edited_authenticated_flag_without_user_goes_to_login() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("session.json");
    std::fs::write(&path, r#"{"isAuthenticated": true, "userKey": "u1"}"#)?;

    let state = SessionStore::file(&path).load();
    assert!(state.is_authenticated, "blob deserializes as written");
    assert_eq!(evaluate_access(&state, Some(Role::Admin)), AccessDecision::DenyToLogin);
    Ok(())
}

#[test]
fn redirect_paths_are_stable() {
    assert_eq!(login_path(), "/login");
    assert_eq!(landing_path(Role::Admin), "/admin");
    assert_eq!(landing_path(Role::User), "/dashboard");
}
