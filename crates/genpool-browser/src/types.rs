//! Browser session types: per-service session profiles and page options.

use genpool_accounts::SessionCookie;
use serde::{Deserialize, Serialize};

/// Where and how a service issues its session cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProfile {
    /// Short service name used in logs and store paths.
    pub service: &'static str,
    pub login_url: &'static str,
    /// Control that opens the third-party login flow.
    pub login_button: &'static str,
    /// Authenticated page visited after login to force final cookie issuance.
    pub landing_url: Option<&'static str>,
    /// Page opened when restoring from persisted cookies.
    pub restore_url: &'static str,
    /// URLs whose cookies are harvested into the record.
    pub cookie_domains: &'static [&'static str],
    /// Cookie that must be present for the session to count as established.
    pub primary_cookie: &'static str,
    /// Per-request re-signed session cookies, when the service uses them.
    pub session_slots: Option<SessionSlots>,
    /// Keep the bootstrap page alive for in-page calls.
    pub keep_page: bool,
}

/// Session-slot cookies whose names share a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSlots {
    pub url: &'static str,
    pub prefix: &'static str,
}

/// Options for opening a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Cookies injected before the first navigation.
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    /// Block heavy resources (images, fonts) on pages that only need scripts.
    #[serde(default)]
    pub simplify: bool,
}

/// Session artifacts collected from a live page.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    pub cookies: Vec<SessionCookie>,
    pub session_cookies: Vec<SessionCookie>,
    pub user_agent: String,
}
