use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::{json, Value};

use crate::auth::UserRecord;

/// Authenticated HTTP session against a remote smartnest hub.
///
/// Login captures the session cookie and CSRF token once; every subsequent
/// request (HTTP and WebSocket upgrade) replays them explicitly. The hub sets
/// the cookie with the Secure attribute, so a client-side cookie store would
/// drop it on plain-http hubs; sending the header ourselves sidesteps that.
#[derive(Clone)]
pub struct HttpSession {
    base: Url,
    client: reqwest::Client,
    csrf: String,
    cookie_header: String,
}

/// Outcome of a successful login: the credential record and key the hub
/// verified, plus the role landing path it suggested.
pub struct LoginOutcome {
    pub user: UserRecord,
    pub user_key: String,
    pub landing: String,
}

fn encode_tree_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl HttpSession {
    pub async fn connect(base: &str, email: &str, pass: &str) -> Result<(Self, LoginOutcome)> {
        let base_url = Url::parse(base).context("invalid base URL")?;
        let client = reqwest::Client::builder().build()?;
        // POST /login
        let login_url = base_url.join("/login")?;
        let resp = client
            .post(login_url)
            .json(&json!({"email": email, "password": pass}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("login failed: HTTP {}", resp.status()));
        }
        // Capture Set-Cookie headers into a single Cookie string (for WS upgrades)
        let mut cookies: Vec<String> = Vec::new();
        for val in resp.headers().get_all(reqwest::header::SET_COOKIE).iter() {
            if let Ok(s) = val.to_str() {
                // take name=value before first ';'
                if let Some((nv, _)) = s.split_once(';') {
                    cookies.push(nv.trim().to_string());
                }
            }
        }
        let v: Value = resp.json().await.unwrap_or(json!({"status":"error"}));
        if v.get("status").and_then(|s| s.as_str()) != Some("ok") {
            return Err(anyhow!("login failed"));
        }
        let user: UserRecord = serde_json::from_value(v.get("user").cloned().unwrap_or(Value::Null))
            .context("login response missing user record")?;
        let user_key = v
            .get("userKey")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow!("login response missing userKey"))?
            .to_string();
        let landing = v
            .get("landing")
            .and_then(|s| s.as_str())
            .unwrap_or("/dashboard")
            .to_string();
        let cookie_header = if cookies.is_empty() { String::new() } else { cookies.join("; ") };
        // GET /csrf
        let csrf_url = base_url.join("/csrf")?;
        let mut csrf_req = client.get(csrf_url);
        if !cookie_header.is_empty() {
            csrf_req = csrf_req.header("Cookie", &cookie_header);
        }
        let resp2 = csrf_req.send().await?;
        if !resp2.status().is_success() {
            return Err(anyhow!("failed to obtain csrf: HTTP {}", resp2.status()));
        }
        let v2: Value = resp2.json().await.unwrap_or(json!({}));
        let csrf = v2.get("csrf").and_then(|s| s.as_str()).unwrap_or("").to_string();
        if csrf.is_empty() {
            return Err(anyhow!("csrf token missing"));
        }
        let session = Self { base: base_url, client, csrf, cookie_header };
        Ok((session, LoginOutcome { user, user_key, landing }))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.csrf) {
            headers.insert("x-csrf-token", v);
        }
        if !self.cookie_header.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&self.cookie_header) {
                headers.insert("Cookie", v);
            }
        }
        headers
    }

    async fn get_json(&self, route: &str) -> Result<Value> {
        let url = self.base.join(route)?;
        let resp = self.client.get(url).headers(self.auth_headers()).send().await?;
        let status = resp.status();
        let val: Value = resp.json().await.unwrap_or(json!({"status":"error"}));
        if !status.is_success() {
            return Err(anyhow!("remote error: {}", val));
        }
        Ok(val)
    }

    async fn post_json(&self, route: &str, body: &Value) -> Result<Value> {
        let url = self.base.join(route)?;
        let resp = self
            .client
            .post(url)
            .headers(self.auth_headers())
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let val: Value = resp.json().await.unwrap_or(json!({"status":"error"}));
        if !status.is_success() {
            return Err(anyhow!("remote error: {}", val));
        }
        Ok(val)
    }

    /// One-shot read of a device-tree path.
    pub async fn read_path(&self, path: &str) -> Result<Value> {
        let v = self.get_json(&format!("/data/{}", encode_tree_path(path))).await?;
        Ok(v.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Write (`Some`) or delete (`None`) a device-tree path.
    pub async fn write_path(&self, path: &str, value: Option<Value>) -> Result<()> {
        let body = json!({"value": value});
        self.post_json(&format!("/data/{}", encode_tree_path(path)), &body).await?;
        Ok(())
    }

    pub async fn sensors(&self) -> Result<Value> {
        let v = self.get_json("/sensors").await?;
        Ok(v.get("sensors").cloned().unwrap_or(Value::Null))
    }

    pub async fn users(&self) -> Result<Value> {
        let v = self.get_json("/users").await?;
        Ok(v.get("users").cloned().unwrap_or(Value::Null))
    }

    pub async fn add_user(&self, key: &str, record: &UserRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.post_json(&format!("/users/{}", urlencoding::encode(key)), &body).await?;
        Ok(())
    }

    pub async fn delete_user(&self, key: &str) -> Result<()> {
        self.post_json(&format!("/users/{}/delete", urlencoding::encode(key)), &json!({})).await?;
        Ok(())
    }

    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        self.post_json("/password", &json!({"old_password": old, "new_password": new})).await?;
        Ok(())
    }

    pub async fn set_switch(&self, route: &str, on: bool) -> Result<()> {
        let status = if on { "ON" } else { "OFF" };
        self.post_json(route, &json!({"status": status})).await?;
        Ok(())
    }

    pub async fn clear_history(&self, which: &str) -> Result<()> {
        self.post_json(&format!("/history/{}/clear", which), &json!({})).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.post_json("/logout", &json!({})).await?;
        Ok(())
    }

    /// Subscribe to a device-tree path over WebSocket and hand every event to
    /// `on_event`. Stops after `limit` events when given, otherwise runs until
    /// the server closes the socket.
    pub async fn watch<F>(&self, path: &str, limit: Option<usize>, mut on_event: F) -> Result<()>
    where
        F: FnMut(Value),
    {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let mut ws_url = self.base.join("/ws")?;
        let scheme = match ws_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive ws scheme from {}", self.base))?;
        let mut request = ws_url.as_str().into_client_request()?;
        if !self.cookie_header.is_empty() {
            request
                .headers_mut()
                .insert("Cookie", HeaderValue::from_str(&self.cookie_header)?);
        }
        request
            .headers_mut()
            .insert("x-csrf-token", HeaderValue::from_str(&self.csrf)?);

        let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
        socket
            .send(WsMessage::Text(json!({"subscribe": path}).to_string()))
            .await?;

        let mut delivered = 0usize;
        while let Some(msg) = socket.next().await {
            let msg = msg?;
            if let WsMessage::Text(text) = msg {
                let Ok(v) = serde_json::from_str::<Value>(&text) else { continue };
                // skip the subscribe ack; events carry a path
                if v.get("path").is_none() {
                    continue;
                }
                on_event(v);
                delivered += 1;
                if let Some(n) = limit {
                    if delivered >= n {
                        break;
                    }
                }
            }
        }
        let _ = socket.close(None).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_paths_are_segment_encoded() {
        assert_eq!(encode_tree_path("parking/slot1"), "parking/slot1");
        assert_eq!(encode_tree_path("a b/c"), "a%20b/c");
        assert_eq!(encode_tree_path("/DHT11/"), "DHT11");
    }
}
