//! Authenticated HTTP client with a failure interceptor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genpool_core::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives every non-2xx response and turns it into the error the caller sees.
#[async_trait]
pub trait FailureInterceptor: Send + Sync {
    async fn on_failure(&self, status: u16, body: String) -> Error;
}

/// Thin client bound to one base URL and proxy.
pub struct ApiClient {
    http: Client,
    base_url: Url,
    interceptor: Arc<dyn FailureInterceptor>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        proxy: Option<&str>,
        interceptor: Arc<dyn FailureInterceptor>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(proxy)?,
            base_url: parse_base(base_url)?,
            interceptor,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Http(format!("invalid path {}: {}", path, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, headers: HeaderMap) -> Result<T> {
        let req = self.http.get(self.url(path)?).headers(headers);
        self.send(req).await?.json::<T>().await.map_err(decode_error)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B, headers: HeaderMap) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self.http.post(self.url(path)?).headers(headers).json(body);
        self.send(req).await?.json::<T>().await.map_err(decode_error)
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
        headers: HeaderMap,
    ) -> Result<T> {
        let req = self.http.post(self.url(path)?).headers(headers).multipart(form);
        self.send(req).await?.json::<T>().await.map_err(decode_error)
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        let response = req
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.interceptor.on_failure(status.as_u16(), body).await);
        }
        debug!("{} {}", status, response.url().path());
        Ok(response)
    }
}

/// Build a `reqwest` client, routed through `proxy` when given.
pub(crate) fn build_http(proxy: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| Error::Configuration(format!("invalid proxy {}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| Error::Http(format!("client build failed: {}", e)))
}

fn parse_base(base_url: &str) -> Result<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized)
        .map_err(|e| Error::Configuration(format!("invalid base url {}: {}", base_url, e)))
}

fn decode_error(e: reqwest::Error) -> Error {
    Error::Http(format!("Response decode failed: {}", e))
}
