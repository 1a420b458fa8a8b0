//! Credential, session and access-gate services for the SmartNest hub.
//! Keep the public surface thin and split implementation across sub-modules.

mod credentials;
mod gate;
mod session;
mod user;

pub use credentials::CredentialService;
pub use gate::{evaluate_access, landing_path, login_path, AccessDecision};
pub use session::{AuthState, FileSessionStorage, MemorySessionStorage, SessionStorage, SessionStore};
pub use user::{Role, UserRecord};

/// Root path of the credential table in the device tree.
pub const CREDENTIALS_PATH: &str = "credentials";
