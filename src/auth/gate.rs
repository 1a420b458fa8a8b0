use super::session::AuthState;
use super::user::Role;

/// Outcome of evaluating a protected view or endpoint against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Authenticated and the role requirement (if any) matches: render.
    Grant,
    /// Not authenticated: send to the login view.
    DenyToLogin,
    /// Authenticated but the wrong role: send to the caller's own landing
    /// view, never back to login.
    DenyToLanding(Role),
}

/// Pure access policy, evaluated fresh on every call; nothing is cached.
pub fn evaluate_access(state: &AuthState, required_role: Option<Role>) -> AccessDecision {
    if !state.is_authenticated {
        return AccessDecision::DenyToLogin;
    }
    if let Some(required) = required_role {
        match state.role() {
            Some(actual) if actual == required => AccessDecision::Grant,
            Some(actual) => AccessDecision::DenyToLanding(actual),
            // Authenticated flag without a user record should not occur, but a
            // session blob can be hand-edited; treat it as unauthenticated.
            None => AccessDecision::DenyToLogin,
        }
    } else {
        AccessDecision::Grant
    }
}

pub fn login_path() -> &'static str {
    "/login"
}

pub fn landing_path(role: Role) -> &'static str {
    match role {
        Role::Admin => "/admin",
        Role::User => "/dashboard",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRecord;

    fn state_with_role(role: Role) -> AuthState {
        AuthState::authenticated(
            UserRecord {
                email: "a@x.com".into(),
                password: "p".into(),
                name: "A".into(),
                role,
            },
            "u1".into(),
        )
    }

    #[test]
    fn unauthenticated_goes_to_login() {
        assert_eq!(evaluate_access(&AuthState::default(), None), AccessDecision::DenyToLogin);
        assert_eq!(
            evaluate_access(&AuthState::default(), Some(Role::Admin)),
            AccessDecision::DenyToLogin
        );
    }

    #[test]
    fn wrong_role_goes_to_own_landing() {
        let user = state_with_role(Role::User);
        assert_eq!(
            evaluate_access(&user, Some(Role::Admin)),
            AccessDecision::DenyToLanding(Role::User)
        );
        let admin = state_with_role(Role::Admin);
        assert_eq!(
            evaluate_access(&admin, Some(Role::User)),
            AccessDecision::DenyToLanding(Role::Admin)
        );
    }

    #[test]
    fn matching_or_absent_role_grants() {
        let user = state_with_role(Role::User);
        assert_eq!(evaluate_access(&user, Some(Role::User)), AccessDecision::Grant);
        assert_eq!(evaluate_access(&user, None), AccessDecision::Grant);
    }

    #[test]
    fn authenticated_flag_without_user_is_treated_as_logged_out() {
        let state = AuthState { is_authenticated: true, user: None, user_key: Some("u1".into()) };
        assert_eq!(evaluate_access(&state, Some(Role::Admin)), AccessDecision::DenyToLogin);
    }

    #[test]
    fn landing_paths() {
        assert_eq!(landing_path(Role::Admin), "/admin");
        assert_eq!(landing_path(Role::User), "/dashboard");
        assert_eq!(login_path(), "/login");
    }
}
