//! Video generation worker: bearer-token API calls plus fetches issued from
//! inside the live browser page.

use std::collections::BTreeMap;

use genpool_accounts::{AccountPatch, AccountRecord};
use genpool_browser::SessionProfile;
use genpool_core::{Error, Result};
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::{AuthMaterial, BearerAuth, SupabaseToken};
use crate::http::ApiClient;
use crate::worker::{Service, Worker};

const PROFILE: SessionProfile = SessionProfile {
    service: "pika",
    login_url: "https://pika.art/login",
    login_button: "form > div > button",
    landing_url: None,
    restore_url: "https://pika.art/my-library/",
    cookie_domains: &["https://pika.art"],
    primary_cookie: crate::auth::supabase::LOGIN_COOKIE,
    session_slots: None,
    keep_page: true,
};

/// Resolves `{status, body}` for a same-origin fetch, or `null` when the
/// request never produced a response.
const PAGE_FETCH_SCRIPT: &str = r#"async (origin, path, init, defaults) => {
  try {
    const res = await fetch(origin + path, {
      referrer: origin + '/my-library',
      referrerPolicy: 'same-origin',
      body: null,
      method: 'GET',
      mode: 'cors',
      credentials: 'include',
      ...init,
      headers: { ...defaults, ...(init.headers || {}) },
    });
    return { status: res.status, body: await res.text() };
  } catch (e) {
    return null;
  }
}"#;

const VIDEO_SOURCES_SCRIPT: &str = r#"(id) => {
  const sources = [];
  document.querySelectorAll('video > source').forEach((v) => sources.push(v.getAttribute('src')));
  return sources.find((src) => src && src.indexOf(id) !== -1) || null;
}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PikaConfig {
    pub origin: String,
    pub api_base: String,
    /// Server action id of the library page.
    pub next_action: String,
    pub router_state_tree: String,
}

impl Default for PikaConfig {
    fn default() -> Self {
        Self {
            origin: "https://pika.art".into(),
            api_base: "https://api.pika.art/".into(),
            next_action: "a4f7d00566d7755f69cb53e2b2bbaf32236f107e".into(),
            router_state_tree: "%5B%22%22%2C%7B%22children%22%3A%5B%22(dashboard)%22%2C%7B%22children%22%3A%5B%22my-library%22%2C%7B%22children%22%3A%5B%22__PAGE__%22%2C%7B%7D%5D%7D%5D%7D%5D%7D%2Cnull%2Cnull%2Ctrue%5D".into(),
        }
    }
}

#[derive(Default)]
pub struct Pika {
    config: PikaConfig,
    client: OnceCell<ApiClient>,
}

impl Pika {
    pub fn new(config: PikaConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn default_headers(&self) -> Value {
        json!({
            "accept": "text/x-component",
            "accept-language": "en-US,en;q=0.9",
            "content-type": "text/plain;charset=UTF-8",
            "next-action": self.config.next_action,
            "next-router-state-tree": self.config.router_state_tree,
            "sec-fetch-dest": "empty",
            "sec-fetch-mode": "cors",
            "sec-fetch-site": "same-origin",
        })
    }
}

impl Service for Pika {
    fn profile() -> &'static SessionProfile {
        &PROFILE
    }

    fn derive(record: &AccountRecord) -> Result<AccountPatch> {
        let token = SupabaseToken::from_record(record)?;
        info!(account = %record.id, "Login token derived");
        Ok(token.to_patch())
    }
}

/// `RequestInit` subset forwarded to the in-page fetch.
#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn get() -> Self {
        Self {
            method: "GET".into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn post(body: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            body: Some(body.into()),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    status: u16,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateOptions {
    aspect_ratio: f64,
    frame_rate: u32,
    camera: Map<String, Value>,
    parameters: GenerateParameters,
    extend: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateParameters {
    guidance_scale: u32,
    motion: u32,
    negative_prompt: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: 16.0 / 9.0,
            frame_rate: 24,
            camera: Map::new(),
            parameters: GenerateParameters {
                guidance_scale: 12,
                motion: 1,
                negative_prompt: String::new(),
            },
            extend: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerationEnvelope {
    data: GenerationData,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    generation: Generation,
}

#[derive(Debug, Deserialize)]
struct Generation {
    id: String,
}

/// One entry of the library listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryVideo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    #[serde(default)]
    pub videos: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse a React server-action payload: the data row is the second line,
/// prefixed with `1:`.
fn parse_library(payload: &str) -> Option<LibraryVideo> {
    let row = payload.lines().nth(1)?;
    let row = row.strip_prefix("1:").unwrap_or(row);
    serde_json::from_str(row).ok()
}

impl Worker<Pika> {
    async fn api(&self) -> Result<&ApiClient> {
        self.client(&self.service.client, &self.service.config.api_base).await
    }

    /// Submit a generation; returns `"<account id>|<generation id>"`.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        self.guarded(async {
            let record = self.lifecycle.record()?;
            let user_id = record
                .user_id
                .clone()
                .ok_or_else(|| Error::SessionIncomplete("login user id not found".into()))?;
            let headers = BearerAuth.headers(&record).await?;

            let form = Form::new()
                .text("promptText", prompt.to_string())
                .text("options", serde_json::to_string(&GenerateOptions::default())?)
                .text("userId", user_id);
            let response: GenerationEnvelope = self.api().await?.post_multipart("generate", form, headers).await?;

            Ok(format!("{}|{}", record.id, response.data.generation.id))
        })
        .await
    }

    /// Source URL of the rendered video for `id`, scraped from the live page.
    pub async fn fetch_video(&self, id: &str) -> Result<Option<String>> {
        self.guarded(async {
            let page = self.live_page()?;
            let value = page.evaluate(VIDEO_SOURCES_SCRIPT, vec![json!(id)]).await?;
            Ok(value.as_str().map(str::to_string))
        })
        .await
    }

    /// Library entry for `id`, fetched through the page's own session.
    pub async fn my_library(&self, id: &str) -> Result<Option<LibraryVideo>> {
        self.guarded(async {
            let body = json!([{ "ids": [id] }]).to_string();
            let payload = self
                .fetch_in_page("/my-library", PageRequest::post(body))
                .await?
                .ok_or_else(|| Error::Transport("fetch my-library failed".into()))?;

            let video = parse_library(&payload);
            if video.is_none() {
                debug!(worker = %self.label(), "Library payload had no entry for {}", id);
            }
            Ok(video)
        })
        .await
    }

    /// Same-origin fetch from inside the live page. `None` means the request
    /// never produced a response.
    pub async fn page_fetch(&self, path: &str, request: PageRequest) -> Result<Option<String>> {
        self.guarded(self.fetch_in_page(path, request)).await
    }

    async fn fetch_in_page(&self, path: &str, request: PageRequest) -> Result<Option<String>> {
        let page = self.live_page()?;
        let args = vec![
            json!(self.service.config.origin),
            json!(path),
            serde_json::to_value(&request)?,
            self.service.default_headers(),
        ];
        let value = page.evaluate(PAGE_FETCH_SCRIPT, args).await?;
        if value.is_null() {
            debug!(worker = %self.label(), "In-page fetch of {} returned no data", path);
            return Ok(None);
        }

        let response: PageResponse = serde_json::from_value(value)?;
        if !(200..300).contains(&response.status) {
            return Err(self.lifecycle.handle_failure(response.status, response.body).await);
        }
        Ok(Some(response.body))
    }

    fn live_page(&self) -> Result<std::sync::Arc<dyn genpool_browser::BrowserPage>> {
        self.lifecycle
            .page()
            .ok_or_else(|| Error::Destroyed(self.label().to_string()))
    }
}
