//! CDN re-hosting of externally hosted media.

use async_trait::async_trait;
use genpool_core::Result;

/// Re-hosts a remote media URL and returns the stable replacement.
#[async_trait]
pub trait MediaRehost: Send + Sync {
    async fn rehost(&self, url: &str) -> Result<String>;
}

/// Returns the original URL unchanged.
pub struct PassthroughRehost;

#[async_trait]
impl MediaRehost for PassthroughRehost {
    async fn rehost(&self, url: &str) -> Result<String> {
        Ok(url.to_string())
    }
}
