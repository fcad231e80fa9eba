//! Browser automation capability consumed by the bootstrapper and workers.
//!
//! These traits abstract the headless browser and the third-party login flow
//! so that workers can be driven by any automation backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genpool_accounts::SessionCookie;
use genpool_core::{Error, Result};
use serde_json::Value;

use crate::types::PageOptions;

/// Script returning the live user agent of the page's browser context.
pub const USER_AGENT_SCRIPT: &str = "() => navigator.userAgent.toString()";

/// One page inside a browser context.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a function expression in the page, passing `args` as its parameters.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value>;

    /// Cookies visible to `url`.
    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>>;

    /// Close the page together with its browser.
    async fn close(&self) -> Result<()>;

    async fn user_agent(&self) -> Result<String> {
        let value = self.evaluate(USER_AGENT_SCRIPT, Vec::new()).await?;
        value
            .as_str()
            .filter(|ua| !ua.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Browser("navigator.userAgent returned no string".into()))
    }
}

/// Opens pages in fresh browser contexts.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open_page(&self, url: &str, options: PageOptions) -> Result<Arc<dyn BrowserPage>>;
}

/// Third-party interactive login, opaque to the worker.
#[async_trait]
pub trait InteractiveLogin: Send + Sync {
    /// Leave `page` authenticated or fail.
    async fn login(
        &self,
        page: &dyn BrowserPage,
        email: &str,
        password: &str,
        recovery: Option<&str>,
    ) -> Result<()>;
}
