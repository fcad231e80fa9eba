//! Per-request session tokens minted by a Clerk frontend API.
//!
//! The service expects every `__session*` cookie to carry a freshly signed
//! short-lived JWT. The long-lived `__client` cookie harvested at bootstrap is
//! exchanged for one on each call.

use std::sync::Arc;

use async_trait::async_trait;
use genpool_accounts::AccountRecord;
use genpool_core::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, ORIGIN, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::AuthMaterial;
use crate::http::{build_http, FailureInterceptor};

/// Long-lived Clerk client cookie.
pub const CLIENT_COOKIE: &str = "__client";

/// Where the signer lives and which site the tokens are for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClerkConfig {
    /// Clerk frontend API, e.g. `https://clerk.flux1.ai`.
    pub api_base: String,
    /// Site origin sent with signer and API requests.
    pub origin: String,
    pub referer: String,
    pub js_version: String,
}

impl Default for ClerkConfig {
    fn default() -> Self {
        Self {
            api_base: "https://clerk.flux1.ai".into(),
            origin: "https://flux1.ai".into(),
            referer: "https://flux1.ai/create".into(),
            js_version: "5.14.0".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    response: Option<ClientState>,
}

#[derive(Debug, Deserialize)]
struct ClientState {
    last_active_session_id: Option<String>,
    #[serde(default)]
    sessions: Vec<ClientSession>,
}

#[derive(Debug, Deserialize)]
struct ClientSession {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    jwt: Option<String>,
}

/// Exchanges the `__client` cookie for short-lived session tokens.
pub struct ClerkSigner {
    http: Client,
    config: ClerkConfig,
    client_cookie: String,
    user_agent: String,
    interceptor: Arc<dyn FailureInterceptor>,
    session_id: OnceCell<String>,
}

impl ClerkSigner {
    pub fn new(
        config: ClerkConfig,
        client_cookie: &str,
        user_agent: &str,
        proxy: Option<&str>,
        interceptor: Arc<dyn FailureInterceptor>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(proxy)?,
            config,
            client_cookie: client_cookie.to_string(),
            user_agent: user_agent.to_string(),
            interceptor,
            session_id: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}?_clerk_js_version={}",
            self.config.api_base.trim_end_matches('/'),
            path,
            self.config.js_version
        )
    }

    fn signer_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, header_value(&format!("{}={}", CLIENT_COOKIE, self.client_cookie))?);
        headers.insert(USER_AGENT, header_value(&self.user_agent)?);
        headers.insert(ORIGIN, header_value(&self.config.origin)?);
        Ok(headers)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req
            .headers(self.signer_headers()?)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Clerk request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.interceptor.on_failure(status.as_u16(), body).await);
        }
        Ok(response)
    }

    /// Active session id, resolved once per signer.
    async fn session_id(&self) -> Result<&str> {
        let id = self
            .session_id
            .get_or_try_init(|| async {
                let envelope: ClientEnvelope = self
                    .send(self.http.get(self.endpoint("/v1/client")))
                    .await?
                    .json()
                    .await
                    .map_err(|e| Error::Http(format!("Clerk client decode failed: {}", e)))?;
                let state = envelope
                    .response
                    .ok_or_else(|| Error::SessionIncomplete("clerk client has no state".into()))?;
                let id = state
                    .last_active_session_id
                    .or_else(|| state.sessions.into_iter().next().map(|s| s.id))
                    .ok_or_else(|| Error::SessionIncomplete("no active clerk session".into()))?;
                debug!("Clerk session resolved: {}", id);
                Ok::<_, Error>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Mint a fresh short-lived session token.
    pub async fn token(&self) -> Result<String> {
        let sid = self.session_id().await?;
        let path = format!("/v1/client/sessions/{}/tokens", sid);
        let response: TokenResponse = self
            .send(self.http.post(self.endpoint(&path)))
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(format!("Clerk token decode failed: {}", e)))?;
        response
            .jwt
            .filter(|jwt| !jwt.is_empty())
            .ok_or_else(|| Error::SessionIncomplete("clerk returned no token".into()))
    }
}

/// Variant A headers: every session slot re-signed with a fresh token.
pub struct ClerkAuth {
    config: ClerkConfig,
    proxy: Option<String>,
    interceptor: Arc<dyn FailureInterceptor>,
    signer: OnceCell<ClerkSigner>,
}

impl ClerkAuth {
    pub fn new(
        config: ClerkConfig,
        proxy: Option<String>,
        interceptor: Arc<dyn FailureInterceptor>,
    ) -> Self {
        Self {
            config,
            proxy,
            interceptor,
            signer: OnceCell::new(),
        }
    }

    async fn signer(&self, record: &AccountRecord, user_agent: &str) -> Result<&ClerkSigner> {
        self.signer
            .get_or_try_init(|| async {
                let client = record
                    .find_cookie(CLIENT_COOKIE)
                    .ok_or_else(|| Error::SessionIncomplete("__client cookie not found".into()))?;
                ClerkSigner::new(
                    self.config.clone(),
                    &client.value,
                    user_agent,
                    self.proxy.as_deref(),
                    self.interceptor.clone(),
                )
            })
            .await
    }
}

#[async_trait]
impl AuthMaterial for ClerkAuth {
    async fn headers(&self, record: &AccountRecord) -> Result<HeaderMap> {
        let user_agent = record
            .user_agent
            .as_deref()
            .ok_or_else(|| Error::SessionIncomplete("user agent not captured".into()))?;
        if record.session_cookies.is_empty() {
            return Err(Error::SessionIncomplete("no session cookies".into()));
        }

        let token = self.signer(record, user_agent).await?.token().await?;

        let mut cookie = format!("__client_uat={}", chrono::Utc::now().timestamp());
        for slot in &record.session_cookies {
            cookie.push_str(&format!("; {}={}", slot.name, token));
        }

        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert(
            "accept-language",
            HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7,en-GB;q=0.6"),
        );
        headers.insert(ORIGIN, header_value(&self.config.origin)?);
        headers.insert(HeaderName::from_static("priority"), HeaderValue::from_static("u=1, i"));
        headers.insert("referer", header_value(&self.config.referer)?);
        headers.insert(USER_AGENT, header_value(user_agent)?);
        headers.insert(COOKIE, header_value(&cookie)?);
        headers.insert(
            "content-type",
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::SessionIncomplete(format!("unusable header value: {}", e)))
}
