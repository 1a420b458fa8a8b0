use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::user::{Role, UserRecord};
use crate::tprintln;

/// Client-resident, self-asserted authentication state.
///
/// Invariant: `is_authenticated` is true iff both `user` and `user_key` were
/// populated by a successful credential verification. The serialized form uses
/// the field names existing session blobs already carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub user_key: Option<String>,
}

impl AuthState {
    pub fn authenticated(user: UserRecord, user_key: String) -> Self {
        Self { is_authenticated: true, user: Some(user), user_key: Some(user_key) }
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }
}

/// Storage port behind the session store: a single string-keyed slot.
/// Swap in `MemorySessionStorage` for tests and embedded use.
pub trait SessionStorage: Send + Sync {
    fn read(&self) -> Option<String>;
    fn write(&self, contents: &str) -> std::io::Result<()>;
    fn remove(&self);
}

/// Durable slot backed by a single JSON file (the localStorage analog).
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStorage for FileSessionStorage {
    fn read(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    fn write(&self, contents: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        std::fs::write(&self.path, contents)
    }

    fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Default)]
pub struct MemorySessionStorage {
    slot: parking_lot::Mutex<Option<String>>,
}

impl SessionStorage for MemorySessionStorage {
    fn read(&self) -> Option<String> {
        self.slot.lock().clone()
    }

    fn write(&self, contents: &str) -> std::io::Result<()> {
        *self.slot.lock() = Some(contents.to_string());
        Ok(())
    }

    fn remove(&self) {
        *self.slot.lock() = None;
    }
}

/// Injectable session context over a storage port.
///
/// `load` is fail-open: absent, corrupt or unparseable storage yields the
/// unauthenticated default rather than an error. The session never expires on
/// its own and the stored `user_key` is not revalidated against the credential
/// table on rehydrate.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    pub fn file<P: AsRef<std::path::Path>>(path: P) -> Self {
        Self::new(Arc::new(FileSessionStorage::new(path.as_ref().to_path_buf())))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::default()))
    }

    /// Persist an authenticated state, replacing any prior entry.
    pub fn save(&self, user: UserRecord, user_key: String) {
        let state = AuthState::authenticated(user, user_key);
        match serde_json::to_string(&state) {
            Ok(s) => {
                if let Err(e) = self.storage.write(&s) {
                    tracing::warn!("session save failed: {e}");
                }
            }
            Err(e) => tracing::warn!("session encode failed: {e}"),
        }
    }

    pub fn load(&self) -> AuthState {
        match self.storage.read() {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => AuthState::default(),
        }
    }

    pub fn clear(&self) {
        self.storage.remove();
    }

    /// Keep the cached record consistent after a password change: only updates
    /// when the active session belongs to `user_key`.
    pub fn refresh_password(&self, user_key: &str, new_password: &str) {
        let mut state = self.load();
        if !state.is_authenticated || state.user_key.as_deref() != Some(user_key) {
            return;
        }
        if let Some(user) = state.user.as_mut() {
            user.password = new_password.to_string();
            match serde_json::to_string(&state) {
                Ok(s) => {
                    if let Err(e) = self.storage.write(&s) {
                        tracing::warn!("session refresh failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("session encode failed: {e}"),
            }
            tprintln!("session.refresh_password key={}", user_key);
        }
    }
}
