//! Image generation worker: server-side HTTP with Clerk-signed session cookies.

use genpool_accounts::AccountRecord;
use genpool_browser::{SessionProfile, SessionSlots};
use genpool_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::auth::{AuthMaterial, ClerkAuth, ClerkConfig};
use crate::http::ApiClient;
use crate::worker::{Service, Worker};

const PROFILE: SessionProfile = SessionProfile {
    service: "ideogram",
    login_url: "https://ideogram.ai/login",
    login_button: ".MuiButton-containedPrimary",
    landing_url: Some("https://flux1.ai/create"),
    restore_url: "https://flux1.ai/create",
    cookie_domains: &["https://clerk.flux1.ai"],
    primary_cookie: "__client",
    session_slots: Some(SessionSlots {
        url: "https://flux1.ai",
        prefix: "__session",
    }),
    keep_page: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeogramConfig {
    pub api_base: String,
    pub clerk: ClerkConfig,
}

impl Default for IdeogramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://ideogram.ai/api/".into(),
            clerk: ClerkConfig::default(),
        }
    }
}

#[derive(Default)]
pub struct Ideogram {
    config: IdeogramConfig,
    client: OnceCell<ApiClient>,
    auth: OnceCell<ClerkAuth>,
}

impl Ideogram {
    pub fn new(config: IdeogramConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

impl Service for Ideogram {
    fn profile() -> &'static SessionProfile {
        &PROFILE
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    data: String,
}

/// Generation request. Fields beyond the prompt pass through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionsRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Generated image; replaced by its CDN copy before being returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_after_src: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Worker<Ideogram> {
    async fn api(&self) -> Result<&ApiClient> {
        self.client(&self.service.client, &self.service.config.api_base).await
    }

    async fn headers(&self, record: &AccountRecord) -> Result<reqwest::header::HeaderMap> {
        let auth = self
            .service
            .auth
            .get_or_init(|| async {
                ClerkAuth::new(
                    self.service.config.clerk.clone(),
                    self.lifecycle.proxy(),
                    self.lifecycle.clone(),
                )
            })
            .await;
        auth.headers(record).await
    }

    pub async fn chat(&self, messages: &str) -> Result<String> {
        self.guarded(async {
            let record = self.lifecycle.record()?;
            let headers = self.headers(&record).await?;
            let response: ChatResponse = self
                .api()
                .await?
                .post_json("chat", &ChatRequest { messages }, headers)
                .await?;
            Ok(response.data)
        })
        .await
    }

    pub async fn predictions(&self, request: &PredictionsRequest) -> Result<PredictionsResponse> {
        self.guarded(async {
            let record = self.lifecycle.record()?;
            let headers = self.headers(&record).await?;
            self.api().await?.post_json("predictions", request, headers).await
        })
        .await
    }

    pub async fn result(&self, id: &str) -> Result<ResultResponse> {
        self.guarded(async {
            let record = self.lifecycle.record()?;
            let headers = self.headers(&record).await?;
            let path = format!("result/{}", urlencoding::encode(id));
            let mut result: ResultResponse = self.api().await?.get_json(&path, headers).await?;

            if let Some(src) = result.img_after_src.take() {
                debug!(worker = %self.label(), "Re-hosting {}", src);
                result.img_after_src = Some(self.deps.rehost.rehost(&src).await?);
            }
            Ok(result)
        })
        .await
    }
}
