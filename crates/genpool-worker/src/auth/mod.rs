//! Auth material providers: turn persisted session artifacts into request headers.

pub mod clerk;
pub mod supabase;

use async_trait::async_trait;
use genpool_accounts::AccountRecord;
use genpool_core::Result;
use reqwest::header::HeaderMap;

pub use clerk::{ClerkAuth, ClerkConfig, ClerkSigner};
pub use supabase::{BearerAuth, SupabaseToken};

/// Produces headers valid for a single authenticated call.
///
/// Implementations may be called concurrently for the same record.
#[async_trait]
pub trait AuthMaterial: Send + Sync {
    async fn headers(&self, record: &AccountRecord) -> Result<HeaderMap>;
}
