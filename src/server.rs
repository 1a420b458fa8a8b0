//!
//! smartnest HTTP/WS server
//! ------------------------
//! This module defines the Axum-based HTTP API and WebSocket interface for the
//! SmartNest hub.
//!
//! Responsibilities:
//! - Session management with a simple cookie + CSRF token model.
//! - Login/logout endpoints backed by the credential service.
//! - User management and password-change endpoints, role-gated through the
//!   access gate.
//! - Raw device-tree read/write endpoints plus typed sensor/actuator routes.
//! - WebSocket endpoint streaming device-tree changes to subscribers.
//! - First-run default admin seeding and startup inventory logs.

use std::{collections::HashMap, net::SocketAddr};

use axum::extract::{
    ws::{Message, WebSocketUpgrade},
    Path, State,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::auth::{
    evaluate_access, landing_path, login_path, AccessDecision, AuthState, CredentialService, Role,
    SessionStore, UserRecord, CREDENTIALS_PATH,
};
use crate::error::AppError;
use crate::store::SharedStore;
use crate::telemetry::{SwitchState, Telemetry, DHT_HISTORY_PATH, SOIL_HISTORY_PATH};

const SESSION_COOKIE: &str = "smartnest_session";

/// Shared server state injected into all handlers.
///
/// Holds the device tree handle, the credential service and telemetry facade
/// over it, and the cookie-session and CSRF token maps.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub credentials: CredentialService,
    pub telemetry: Telemetry,
    /// Session id -> authenticated state mapping
    pub sessions: std::sync::Arc<RwLock<HashMap<String, AuthState>>>,
    /// Session id -> CSRF token mapping
    pub csrf_tokens: std::sync::Arc<RwLock<HashMap<String, String>>>,
}

fn log_startup_folders(data_root: &str) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok();
    let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")).ok();
    let data_env = std::env::var("SMARTNEST_DATA_FOLDER").ok();

    info!(
        target: "startup",
        "smartnest starting. Folder configuration: cwd={:?}, exe={:?}, user={:?}, home={:?}, data_root_param={:?}, SMARTNEST_DATA_FOLDER_env={:?}",
        cwd, exe, user, home, data_root, data_env
    );

    let data_exists = std::path::Path::new(data_root).exists();
    info!(target: "startup", "Path existence: data_root_exists={}", data_exists);
}

/// Seed a default admin credential record when the table is empty, so a fresh
/// hub is reachable before any user has been provisioned.
pub fn ensure_default_admin(credentials: &CredentialService) {
    let empty = credentials.get_all_users().map(|m| m.is_empty()).unwrap_or(true);
    if !empty {
        return;
    }
    let admin = UserRecord {
        email: "admin@smartnest.local".to_string(),
        password: "smartnest".to_string(),
        name: "Administrator".to_string(),
        role: Role::Admin,
    };
    if credentials.add_user("admin", &admin) {
        info!("seeded default admin credential record (admin@smartnest.local)");
    } else {
        tracing::warn!("failed to seed default admin credential record");
    }
}

/// Start the smartnest HTTP server bound to the given port, with the device
/// tree persisted under `data_root`.
pub async fn run_with_ports(http_port: u16, data_root: &str) -> anyhow::Result<()> {
    // Print folder configuration as the very first thing on startup
    log_startup_folders(data_root);

    std::fs::create_dir_all(data_root)
        .with_context(|| format!("Failed to create or access data root: {}", data_root))?;
    let store = SharedStore::open(data_root)
        .with_context(|| format!("While opening device tree under: {}", data_root))?;
    let credentials = CredentialService::new(store.clone());
    ensure_default_admin(&credentials);

    let user_count = credentials.get_all_users().map(|m| m.len()).unwrap_or(0);
    info!("credential table holds {} record(s)", user_count);

    let app_state = AppState {
        store: store.clone(),
        credentials,
        telemetry: Telemetry::new(store),
        sessions: std::sync::Arc::new(RwLock::new(HashMap::new())),
        csrf_tokens: std::sync::Arc::new(RwLock::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/", get(|| async { "smartnest ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/csrf", get(get_csrf))
        .route("/users", get(list_users))
        .route("/users/{key}", post(add_user))
        .route("/users/{key}/delete", post(delete_user))
        .route("/password", post(change_password))
        .route("/data/{*path}", get(data_read).post(data_write))
        .route("/sensors", get(sensors))
        .route("/light", post(set_light))
        .route("/pump", post(set_pump))
        .route("/history/dht/clear", post(clear_dht_history))
        .route("/history/soil/clear", post(clear_soil_history))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Backward-compatible entry that uses defaults
/// Convenience entry point using the default port (8088) and data root "data".
pub async fn run() -> anyhow::Result<()> {
    run_with_ports(8088, "data").await
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct PasswordPayload {
    old_password: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
struct SwitchPayload {
    status: SwitchState,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn get_sid_from_headers(headers: &HeaderMap) -> Option<String> {
    parse_cookie(headers, SESSION_COOKIE)
}

fn hex_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    let _ = getrandom::getrandom(&mut bytes);
    let mut out = String::with_capacity(len * 2);
    use std::fmt::Write as _;
    for b in &bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

async fn session_state(state: &AppState, headers: &HeaderMap) -> AuthState {
    let Some(sid) = get_sid_from_headers(headers) else {
        return AuthState::default();
    };
    let map = state.sessions.read().await;
    map.get(&sid).cloned().unwrap_or_default()
}

async fn validate_csrf(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(sid) = get_sid_from_headers(headers) else { return false; };
    let Some(provided) = headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    else {
        return false;
    };
    let cmap = state.csrf_tokens.read().await;
    match cmap.get(&sid) {
        Some(expected) => expected == &provided,
        None => false,
    }
}

fn set_session_cookie(sid: &str) -> HeaderValue {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/",
        SESSION_COOKIE, sid
    ))
    .unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

/// Map an application error onto the wire: its HTTP status plus a JSON body
/// carrying the machine code and human message.
fn error_response(err: AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status":"error","code": err.code_str(), "error": err.message()})))
}

fn csrf_error() -> (StatusCode, Json<serde_json::Value>) {
    error_response(AppError::csrf("invalid_csrf", "missing or invalid csrf token"))
}

/// Evaluate the access gate for this request; on denial the caller returns the
/// mapped response as-is. `DenyToLogin` maps to 401 with the login path,
/// `DenyToLanding` to 403 with the caller's own landing path.
async fn require(
    state: &AppState,
    headers: &HeaderMap,
    required_role: Option<Role>,
) -> Result<AuthState, (StatusCode, Json<serde_json::Value>)> {
    let auth = session_state(state, headers).await;
    match evaluate_access(&auth, required_role) {
        AccessDecision::Grant => Ok(auth),
        AccessDecision::DenyToLogin => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"status":"unauthorized","redirect": login_path()})),
        )),
        AccessDecision::DenyToLanding(role) => Err((
            StatusCode::FORBIDDEN,
            Json(json!({"status":"forbidden","redirect": landing_path(role)})),
        )),
    }
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> impl IntoResponse {
    match state.credentials.verify_credentials(&payload.email, &payload.password) {
        Some((user, user_key)) => {
            let sid = hex_token(16);
            let csrf = hex_token(32);
            let landing = landing_path(user.role);
            // The client process persists the verified record in its own
            // session slot, so the login body carries it back.
            let body = json!({
                "status": "ok",
                "user": user.clone(),
                "userKey": user_key.clone(),
                "landing": landing,
            });
            {
                let mut map = state.sessions.write().await;
                map.insert(sid.clone(), AuthState::authenticated(user, user_key));
            }
            {
                let mut cmap = state.csrf_tokens.write().await;
                cmap.insert(sid.clone(), csrf);
            }
            let mut headers = HeaderMap::new();
            headers.insert("Set-Cookie", set_session_cookie(&sid));
            (StatusCode::OK, headers, Json(body))
        }
        // One failure shape for both unknown email and wrong password.
        None => {
            let (status, body) =
                error_response(AppError::auth("invalid_credentials", "invalid email or password"));
            (status, HeaderMap::new(), body)
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    // Require CSRF token
    if !validate_csrf(&state, &headers).await {
        let (status, body) = csrf_error();
        return (status, HeaderMap::new(), body);
    }
    if let Some(sid) = get_sid_from_headers(&headers) {
        let mut map = state.sessions.write().await;
        map.remove(&sid);
        // also remove csrf token
        let mut cmap = state.csrf_tokens.write().await;
        cmap.remove(&sid);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status":"ok"})))
}

async fn get_csrf(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let auth = session_state(&state, &headers).await;
    if !auth.is_authenticated {
        return error_response(AppError::auth("unauthorized", "login required"));
    }
    let Some(sid) = get_sid_from_headers(&headers) else {
        return error_response(AppError::auth("unauthorized", "login required"));
    };
    let cmap = state.csrf_tokens.read().await;
    if let Some(token) = cmap.get(&sid) {
        return (StatusCode::OK, Json(json!({"status":"ok","csrf": token})));
    }
    error_response(AppError::internal("csrf_unavailable", "csrf token not available"))
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, Some(Role::Admin)).await {
        return deny;
    }
    match state.credentials.get_all_users() {
        Some(users) => (StatusCode::OK, Json(json!({"status":"ok","users": users}))),
        None => (StatusCode::OK, Json(json!({"status":"ok","users": serde_json::Value::Null}))),
    }
}

async fn add_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(record): Json<UserRecord>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, Some(Role::Admin)).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    if state.credentials.add_user(&key, &record) {
        (StatusCode::OK, Json(json!({"status":"ok","userKey": key})))
    } else {
        error_response(AppError::internal("user_write_failed", "could not write user record"))
    }
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, Some(Role::Admin)).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    if state.credentials.delete_user(&key) {
        (StatusCode::OK, Json(json!({"status":"ok"})))
    } else {
        error_response(AppError::internal("user_delete_failed", "could not delete user record"))
    }
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PasswordPayload>,
) -> impl IntoResponse {
    let auth = match require(&state, &headers, None).await {
        Ok(a) => a,
        Err(deny) => return deny,
    };
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    let (Some(user), Some(user_key)) = (auth.user.clone(), auth.user_key.clone()) else {
        return error_response(AppError::auth("unauthorized", "login required"));
    };
    // Hydrate the cookie session into a session store so the credential
    // service can keep the cached record consistent, then write it back.
    let scratch = SessionStore::in_memory();
    scratch.save(user, user_key.clone());
    let changed = state.credentials.change_password(
        &scratch,
        &user_key,
        &payload.old_password,
        &payload.new_password,
    );
    if !changed {
        return error_response(AppError::user(
            "password_change_failed",
            "old password did not match or record is missing",
        ));
    }
    if let Some(sid) = get_sid_from_headers(&headers) {
        let mut map = state.sessions.write().await;
        map.insert(sid, scratch.load());
    }
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

/// The credential subtree is reachable through the raw data routes; reads and
/// writes there are admin-only, everything else needs only a session.
fn path_role_requirement(path: &str) -> Option<Role> {
    if path == CREDENTIALS_PATH || path.starts_with("credentials/") {
        Some(Role::Admin)
    } else {
        None
    }
}

async fn data_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, path_role_requirement(&path)).await {
        return deny;
    }
    let value = state.store.read_once(&path);
    (StatusCode::OK, Json(json!({"status":"ok","path": path, "value": value})))
}

async fn data_write(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, path_role_requirement(&path)).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    // Body is {"value": ...}; a null (or missing) value is a delete.
    let value = match payload.get("value") {
        Some(serde_json::Value::Null) | None => None,
        Some(v) => Some(v.clone()),
    };
    match state.store.write(&path, value) {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Err(e) => {
            error!("data write failed: {e}");
            error_response(AppError::internal("store_write_failed".to_string(), e.to_string()))
        }
    }
}

async fn sensors(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, None).await {
        return deny;
    }
    (StatusCode::OK, Json(json!({"status":"ok","sensors": state.telemetry.summary()})))
}

async fn set_light(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SwitchPayload>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, None).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    match state.telemetry.set_light(payload.status) {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok","light": payload.status.as_str()}))),
        Err(e) => {
            error!("light write failed: {e}");
            error_response(AppError::internal("store_write_failed".to_string(), e.to_string()))
        }
    }
}

async fn set_pump(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SwitchPayload>,
) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, None).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    match state.telemetry.set_pump(payload.status) {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok","pump": payload.status.as_str()}))),
        Err(e) => {
            error!("pump write failed: {e}");
            error_response(AppError::internal("store_write_failed".to_string(), e.to_string()))
        }
    }
}

async fn clear_dht_history(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, Some(Role::Admin)).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    if state.telemetry.clear_dht_history() {
        (StatusCode::OK, Json(json!({"status":"ok","cleared": DHT_HISTORY_PATH})))
    } else {
        error_response(AppError::internal("history_clear_failed", "could not clear history"))
    }
}

async fn clear_soil_history(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(deny) = require(&state, &headers, Some(Role::Admin)).await {
        return deny;
    }
    if !validate_csrf(&state, &headers).await {
        return csrf_error();
    }
    if state.telemetry.clear_soil_history() {
        (StatusCode::OK, Json(json!({"status":"ok","cleared": SOIL_HISTORY_PATH})))
    } else {
        error_response(AppError::internal("history_clear_failed", "could not clear history"))
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Require login
    let auth = session_state(&state, &headers).await;
    if !auth.is_authenticated {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    // Require CSRF token header too
    if !validate_csrf(&state, &headers).await {
        return (StatusCode::FORBIDDEN, "forbidden: invalid csrf").into_response();
    }
    ws.on_upgrade(move |mut socket| {
        let state = state.clone();
        async move {
            use futures_util::StreamExt;
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
            let mut sub_ids: Vec<u64> = Vec::new();
            loop {
                tokio::select! {
                    incoming = socket.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let parsed: serde_json::Value = match serde_json::from_str(&text) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        let _ = socket.send(Message::Text(json!({"status":"error","error": e.to_string()}).to_string().into())).await;
                                        continue;
                                    }
                                };
                                if let Some(path) = parsed.get("subscribe").and_then(|p| p.as_str()) {
                                    let path_owned = path.to_string();
                                    let tx2 = tx.clone();
                                    let id = state.store.subscribe(path, move |value| {
                                        let event = json!({"path": path_owned, "value": value}).to_string();
                                        let _ = tx2.send(event);
                                    });
                                    sub_ids.push(id);
                                    let _ = socket.send(Message::Text(json!({"status":"ok","subscribed": path, "id": id}).to_string().into())).await;
                                } else if let Some(id) = parsed.get("unsubscribe").and_then(|v| v.as_u64()) {
                                    state.store.unsubscribe(id);
                                    sub_ids.retain(|s| *s != id);
                                    let _ = socket.send(Message::Text(json!({"status":"ok","unsubscribed": id}).to_string().into())).await;
                                } else {
                                    let _ = socket.send(Message::Text(json!({"status":"error","error":"expected subscribe or unsubscribe"}).to_string().into())).await;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Some(ev) => { let _ = socket.send(Message::Text(ev.into())).await; }
                            None => break,
                        }
                    }
                }
            }
            // The socket owns its subscriptions; drop them exactly once.
            for id in sub_ids {
                state.store.unsubscribe(id);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_picks_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("other=1; smartnest_session=abc123; x=y"),
        );
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&headers, "missing"), None);
    }

    #[test]
    fn hex_token_length_and_charset() {
        let t = hex_token(16);
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn credential_paths_require_admin() {
        assert_eq!(path_role_requirement("credentials"), Some(Role::Admin));
        assert_eq!(path_role_requirement("credentials/u1/password"), Some(Role::Admin));
        assert_eq!(path_role_requirement("DHT11"), None);
        // prefix must be an exact segment
        assert_eq!(path_role_requirement("credentialsX"), None);
    }

    #[test]
    fn default_admin_seeded_only_when_table_empty() {
        let store = SharedStore::in_memory();
        let creds = CredentialService::new(store);
        ensure_default_admin(&creds);
        let users = creds.get_all_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users["admin"].role, Role::Admin);
        // second call must not overwrite an edited record
        let mut edited = users["admin"].clone();
        edited.password = "changed".into();
        assert!(creds.add_user("admin", &edited));
        ensure_default_admin(&creds);
        assert_eq!(creds.get_all_users().unwrap()["admin"].password, "changed");
    }
}
