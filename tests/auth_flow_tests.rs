//! Credential-service integration tests: login verification, user management
//! and password change against a live device tree, positive and negative paths.

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;

use smartnest::auth::{CredentialService, Role, SessionStore, UserRecord, CREDENTIALS_PATH};
use smartnest::store::SharedStore;

fn user(email: &str, password: &str, name: &str, role: Role) -> UserRecord {
    UserRecord {
        email: email.to_string(),
        password: password.to_string(),
        name: name.to_string(),
        role,
    }
}

#[tokio::test]
async fn verify_matches_only_exact_email_and_password() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store);
    assert!(creds.add_user("u1", &user("a@x.com", "secret", "Alice", Role::User)));
    assert!(creds.add_user("u2", &user("b@x.com", "hunter2", "Bob", Role::Admin)));

    let (rec, key) = creds.verify_credentials("b@x.com", "hunter2").expect("bob logs in");
    assert_eq!(key, "u2");
    assert_eq!(rec.name, "Bob");
    assert_eq!(rec.role, Role::Admin);

    assert!(creds.verify_credentials("a@x.com", "hunter2").is_none());
    assert!(creds.verify_credentials("A@X.COM", "secret").is_none(), "emails compare exactly");
    assert!(creds.verify_credentials("nobody@x.com", "secret").is_none());
    Ok(())
}

#[tokio::test]
async fn verify_against_empty_table_is_none() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store);
    assert!(creds.verify_credentials("a@x.com", "secret").is_none());
    assert!(creds.get_all_users().is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_emails_resolve_to_first_key_in_order() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store.clone());
    // Same email under two keys; tree object keys iterate in insertion order
    // of the underlying map, so write the later key first to prove ordering
    // is by table position, not write time.
    store.write(
        CREDENTIALS_PATH,
        Some(json!({
            "k1": {"email": "dup@x.com", "password": "p", "name": "First", "role": "user"},
            "k2": {"email": "dup@x.com", "password": "p", "name": "Second", "role": "admin"},
        })),
    )?;
    let (rec, key) = creds.verify_credentials("dup@x.com", "p").expect("match");
    assert_eq!(key, "k1");
    assert_eq!(rec.name, "First");
    Ok(())
}

#[tokio::test]
async fn malformed_records_are_skipped_during_verification() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store.clone());
    store.write(
        CREDENTIALS_PATH,
        Some(json!({
            "bad": {"email": "a@x.com"},
            "worse": 42,
            "good": {"email": "a@x.com", "password": "p", "name": "A", "role": "user"},
        })),
    )?;
    let (_, key) = creds.verify_credentials("a@x.com", "p").expect("good record found");
    assert_eq!(key, "good");

    let users = creds.get_all_users().expect("table exists");
    assert_eq!(users.len(), 1);
    assert!(users.contains_key("good"));
    Ok(())
}

#[tokio::test]
async fn add_overwrites_and_delete_tombstones() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store);

    assert!(creds.add_user("u1", &user("a@x.com", "p1", "Alice", Role::User)));
    assert!(creds.add_user("u1", &user("a@x.com", "p2", "Alice II", Role::Admin)));
    let users = creds.get_all_users().expect("table exists");
    assert_eq!(users.len(), 1);
    assert_eq!(users["u1"].name, "Alice II");
    assert_eq!(users["u1"].password, "p2");

    assert!(creds.delete_user("u1"));
    assert!(creds.verify_credentials("a@x.com", "p2").is_none());
    // delete of an absent key is still a success (idempotent tombstone)
    assert!(creds.delete_user("u1"));
    Ok(())
}

#[tokio::test]
async fn change_password_requires_matching_old_password() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store);
    let session = SessionStore::in_memory();
    creds.add_user("u1", &user("a@x.com", "old", "Alice", Role::User));

    assert!(!creds.change_password(&session, "u1", "wrong", "new"));
    assert!(creds.verify_credentials("a@x.com", "old").is_some(), "record untouched on failure");

    assert!(!creds.change_password(&session, "missing", "old", "new"));

    assert!(creds.change_password(&session, "u1", "old", "new"));
    assert!(creds.verify_credentials("a@x.com", "old").is_none());
    let (rec, _) = creds.verify_credentials("a@x.com", "new").expect("new password works");
    assert_eq!(rec.name, "Alice", "other fields survive the password write");
    Ok(())
}

#[tokio::test]
async fn change_password_refreshes_only_the_owning_session() -> Result<()> {
    let store = SharedStore::in_memory();
    let creds = CredentialService::new(store);
    let session = SessionStore::in_memory();
    let alice = user("a@x.com", "old", "Alice", Role::User);
    creds.add_user("u1", &alice);
    creds.add_user("u2", &user("b@x.com", "old", "Bob", Role::User));
    session.save(alice, "u1".to_string());

    // Changing a different user's password leaves the session alone
    assert!(creds.change_password(&session, "u2", "old", "bobnew"));
    assert_eq!(session.load().user.unwrap().password, "old");

    // Changing the session owner's password updates the cached record
    assert!(creds.change_password(&session, "u1", "old", "alicenew"));
    let state = session.load();
    assert!(state.is_authenticated);
    assert_eq!(state.user.unwrap().password, "alicenew");
    Ok(())
}

#[tokio::test]
async fn credential_table_survives_store_reopen() -> Result<()> {
    let tmp = tempdir()?;
    {
        let store = SharedStore::open(tmp.path())?;
        let creds = CredentialService::new(store);
        creds.add_user("u1", &user("a@x.com", "p", "Alice", Role::Admin));
    }
    let store = SharedStore::open(tmp.path())?;
    let creds = CredentialService::new(store);
    let (rec, key) = creds.verify_credentials("a@x.com", "p").expect("persisted login");
    assert_eq!(key, "u1");
    assert_eq!(rec.role, Role::Admin);
    Ok(())
}
