use std::collections::BTreeMap;

use serde_json::Value;

use super::session::SessionStore;
use super::user::UserRecord;
use super::CREDENTIALS_PATH;
use crate::store::SharedStore;
use crate::tprintln;

/// Credential table operations over the device tree.
///
/// Every operation is a single read or write against the store; nothing here
/// retries, locks or enforces uniqueness. Concurrent writes to the same key
/// race at last-write-wins.
#[derive(Clone)]
pub struct CredentialService {
    store: SharedStore,
}

fn record_path(user_key: &str) -> String {
    format!("{}/{}", CREDENTIALS_PATH, user_key)
}

fn password_path(user_key: &str) -> String {
    format!("{}/{}/password", CREDENTIALS_PATH, user_key)
}

impl CredentialService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Full-table read then a linear scan for exact equality on both fields;
    /// the first matching record wins. Absent table, no match, and unreadable
    /// records all collapse to `None` so the caller cannot distinguish
    /// "no such email" from "wrong password".
    pub fn verify_credentials(&self, email: &str, password: &str) -> Option<(UserRecord, String)> {
        let table = self.store.read_once(CREDENTIALS_PATH)?;
        let map = table.as_object()?;
        for (user_key, raw) in map {
            let Ok(record) = serde_json::from_value::<UserRecord>(raw.clone()) else {
                continue;
            };
            if record.email == email && record.password == password {
                tprintln!("auth.verify matched key={}", user_key);
                return Some((record, user_key.clone()));
            }
        }
        None
    }

    /// Write the record at `user_key`, unconditionally overwriting whatever is
    /// there. The caller supplies the key; no uniqueness check is performed.
    pub fn add_user(&self, user_key: &str, record: &UserRecord) -> bool {
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("add_user encode failed: {e}");
                return false;
            }
        };
        match self.store.write(&record_path(user_key), Some(value)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("add_user write failed: {e}");
                false
            }
        }
    }

    /// Single round-trip table read; `None` when the table is absent.
    /// Entries that do not deserialize as records are skipped.
    pub fn get_all_users(&self) -> Option<BTreeMap<String, UserRecord>> {
        let table = self.store.read_once(CREDENTIALS_PATH)?;
        let map = table.as_object()?;
        Some(
            map.iter()
                .filter_map(|(k, v)| {
                    serde_json::from_value::<UserRecord>(v.clone())
                        .ok()
                        .map(|rec| (k.clone(), rec))
                })
                .collect(),
        )
    }

    /// Tombstone the record (null write), removing it from subsequent reads.
    pub fn delete_user(&self, user_key: &str) -> bool {
        match self.store.write(&record_path(user_key), None) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("delete_user write failed: {e}");
                false
            }
        }
    }

    /// Read the single record, fail (not error) when it is absent or the old
    /// password does not match, then write the password field only. When the
    /// injected session currently belongs to this key its cached password is
    /// refreshed so local and remote state stay consistent.
    pub fn change_password(
        &self,
        session: &SessionStore,
        user_key: &str,
        old_password: &str,
        new_password: &str,
    ) -> bool {
        let Some(raw) = self.store.read_once(&record_path(user_key)) else {
            return false;
        };
        let Ok(record) = serde_json::from_value::<UserRecord>(raw) else {
            return false;
        };
        if record.password != old_password {
            return false;
        }
        if let Err(e) = self
            .store
            .write(&password_path(user_key), Some(Value::String(new_password.to_string())))
        {
            tracing::warn!("change_password write failed: {e}");
            return false;
        }
        session.refresh_password(user_key, new_password);
        true
    }
}
