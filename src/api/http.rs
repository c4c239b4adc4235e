use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::IdentityApi;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::identity::{AuthEvent, AuthEvents};

/// reqwest client for the identity provider and business endpoints.
/// A 401 on any call is reported on the shared `AuthEvents` bus as `SessionExpired`.
pub struct HttpIdentityApi {
    base: String,
    client: reqwest::Client,
    credential: RwLock<Option<String>>,
    events: AuthEvents,
}

impl HttpIdentityApi {
    pub fn new(cfg: &SessionConfig, events: AuthEvents) -> Result<Self> {
        let parsed = Url::parse(&cfg.api_base).context("invalid api base URL")?;
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .build()
            .context("building http client")?;
        let base = parsed.as_str().trim_end_matches('/').to_string();
        Ok(Self { base, client, credential: RwLock::new(None), events })
    }

    pub fn base(&self) -> &str { &self.base }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match self.credential.read().as_deref() {
            Some(tok) => req.bearer_auth(tok),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> SessionResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() { SessionError::Transport(format!("{}: timed out", what)) } else { SessionError::from(e) }
        })?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(target: "portal::api", "{}: credential rejected (401)", what);
            self.events.emit(AuthEvent::SessionExpired);
            return Err(SessionError::Unauthorized);
        }
        if !status.is_success() {
            return Err(SessionError::Transport(format!("{}: HTTP {}", what, status)));
        }
        Ok(resp)
    }

    async fn get_json(&self, path: &str, what: &str) -> SessionResult<Value> {
        let resp = self.send(self.request(reqwest::Method::GET, path), what).await?;
        resp.json::<Value>().await.map_err(|e| SessionError::Transport(format!("{}: invalid json: {}", what, e)))
    }
}

impl IdentityApi for HttpIdentityApi {
    fn set_authorization(&self, credential: Option<&str>) {
        *self.credential.write() = credential.map(str::to_string);
    }

    fn who_am_i(&self) -> BoxFuture<'_, SessionResult<Value>> {
        async move {
            debug!(target: "portal::api", "GET /auth/me");
            self.get_json("/auth/me", "auth.me").await.map_err(|e| match e {
                SessionError::Transport(m) if m.contains("invalid json") => SessionError::InvalidCredentialResponse(m),
                other => other,
            })
        }
        .boxed()
    }

    fn logout(&self) -> BoxFuture<'_, SessionResult<()>> {
        async move {
            debug!(target: "portal::api", "POST /auth/logout");
            self.send(self.request(reqwest::Method::POST, "/auth/logout"), "auth.logout").await.map(|_| ())
        }
        .boxed()
    }

    fn fetch_business<'a>(&'a self, id: &'a str) -> BoxFuture<'a, SessionResult<Value>> {
        async move {
            let path = format!("/business/{}", urlencoding::encode(id));
            debug!(target: "portal::api", "GET {}", path);
            self.get_json(&path, "business.get").await
        }
        .boxed()
    }
}
