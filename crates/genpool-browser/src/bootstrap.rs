//! Session bootstrapper: interactive login or cookie restore, then harvest.

use std::fmt;
use std::sync::Arc;

use genpool_accounts::{AccountPatch, AccountRecord, AccountStore, SessionCookie};
use genpool_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::config::BootstrapConfig;
use crate::driver::{BrowserLauncher, BrowserPage, InteractiveLogin};
use crate::types::{Harvest, PageOptions, SessionProfile};

/// Result of a successful bootstrap.
pub struct BootstrappedSession {
    /// The record as persisted after the harvest.
    pub record: AccountRecord,
    /// Live page, kept only for profiles with `keep_page`.
    pub page: Option<Arc<dyn BrowserPage>>,
    /// True when persisted cookies were reused instead of logging in.
    pub restored: bool,
}

impl fmt::Debug for BootstrappedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrappedSession")
            .field("record", &self.record.id)
            .field("page", &self.page.is_some())
            .field("restored", &self.restored)
            .finish()
    }
}

/// Drives a browser through login and persists the resulting session.
pub struct SessionBootstrapper {
    launcher: Arc<dyn BrowserLauncher>,
    login: Arc<dyn InteractiveLogin>,
    config: BootstrapConfig,
}

impl SessionBootstrapper {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        login: Arc<dyn InteractiveLogin>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            launcher,
            login,
            config,
        }
    }

    /// Establish an authenticated session for `record` and persist its artifacts.
    ///
    /// Proxy, cookies and user agent are written in a single update once every
    /// step has succeeded; on failure the record is left untouched and the
    /// page is closed.
    pub async fn bootstrap(
        &self,
        store: &dyn AccountStore,
        record: &AccountRecord,
        profile: &SessionProfile,
        proxy: Option<&str>,
    ) -> Result<BootstrappedSession> {
        let restored = !record.cookies.is_empty();
        let options = PageOptions {
            proxy: proxy.map(str::to_string),
            cookies: if restored { record.cookies.clone() } else { Vec::new() },
            simplify: restored,
        };

        let url = if restored {
            info!(
                service = profile.service,
                account = %record.id,
                "Restoring session from {} persisted cookies",
                record.cookies.len()
            );
            profile.restore_url
        } else {
            info!(service = profile.service, account = %record.id, "Starting interactive login");
            profile.login_url
        };

        let page = self
            .launcher
            .open_page(url, options)
            .await
            .map_err(failed("open page"))?;

        let harvest = match self.establish(page.as_ref(), record, profile, restored).await {
            Ok(harvest) => harvest,
            Err(e) => {
                release(page.as_ref()).await;
                return Err(e);
            }
        };

        let patch = AccountPatch {
            proxy: Some(proxy.map(str::to_string)),
            cookies: Some(harvest.cookies),
            session_cookies: profile.session_slots.map(|_| harvest.session_cookies),
            user_agent: Some(harvest.user_agent),
            ..Default::default()
        };
        let persisted = match store.update(&record.id, patch) {
            Ok(persisted) => persisted,
            Err(e) => {
                release(page.as_ref()).await;
                return Err(e);
            }
        };
        info!(service = profile.service, account = %record.id, "Session cookies saved");

        let page = if profile.keep_page {
            Some(page)
        } else {
            release(page.as_ref()).await;
            None
        };

        Ok(BootstrappedSession {
            record: persisted,
            page,
            restored,
        })
    }

    async fn establish(
        &self,
        page: &dyn BrowserPage,
        record: &AccountRecord,
        profile: &SessionProfile,
        restored: bool,
    ) -> Result<Harvest> {
        if !restored {
            self.interactive_login(page, record, profile).await?;
        }
        harvest(page, profile).await
    }

    async fn interactive_login(
        &self,
        page: &dyn BrowserPage,
        record: &AccountRecord,
        profile: &SessionProfile,
    ) -> Result<()> {
        page.wait_for_selector(profile.login_button, self.config.selector_timeout)
            .await
            .map_err(failed("login button"))?;
        page.click(profile.login_button)
            .await
            .map_err(failed("click login"))?;

        self.login
            .login(page, &record.email, &record.password, record.recovery.as_deref())
            .await
            .map_err(failed("interactive login"))?;

        if !self.config.settle_delay.is_zero() {
            debug!("Waiting {:?} for session cookies", self.config.settle_delay);
            tokio::time::sleep(self.config.settle_delay).await;
        }

        if let Some(landing) = profile.landing_url {
            page.navigate(landing).await.map_err(failed("landing page"))?;
        }
        Ok(())
    }
}

/// Collect session cookies and the user agent from a live page.
pub async fn harvest(page: &dyn BrowserPage, profile: &SessionProfile) -> Result<Harvest> {
    let mut cookies: Vec<SessionCookie> = Vec::new();
    for url in profile.cookie_domains {
        let jar = page.cookies(url).await.map_err(failed("read cookies"))?;
        for cookie in jar {
            if !cookies
                .iter()
                .any(|c| c.name == cookie.name && c.domain == cookie.domain)
            {
                cookies.push(cookie);
            }
        }
    }

    if !cookies.iter().any(|c| c.name == profile.primary_cookie) {
        return Err(Error::SessionIncomplete(format!(
            "{} cookie not found",
            profile.primary_cookie
        )));
    }

    let session_cookies = match profile.session_slots {
        Some(slots) => {
            let session: Vec<SessionCookie> = page
                .cookies(slots.url)
                .await
                .map_err(failed("read session cookies"))?
                .into_iter()
                .filter(|c| c.name.starts_with(slots.prefix))
                .collect();
            if session.is_empty() {
                return Err(Error::SessionIncomplete(format!(
                    "no {}* cookie found",
                    slots.prefix
                )));
            }
            session
        }
        None => Vec::new(),
    };

    let user_agent = page.user_agent().await.map_err(failed("read user agent"))?;

    Ok(Harvest {
        cookies,
        session_cookies,
        user_agent,
    })
}

fn failed(step: &'static str) -> impl Fn(Error) -> Error {
    move |e| Error::BootstrapFailed(format!("{}: {}", step, e))
}

async fn release(page: &dyn BrowserPage) {
    if let Err(e) = page.close().await {
        warn!("Failed to close browser: {}", e);
    }
}
