//! In-memory browser, login and page fakes for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genpool_accounts::SessionCookie;
use genpool_core::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;

use crate::driver::{BrowserLauncher, BrowserPage, InteractiveLogin, USER_AGENT_SCRIPT};
use crate::types::PageOptions;

/// Scriptable page: cookie jars per URL and canned `evaluate` results.
pub struct FakePage {
    user_agent: String,
    jars: Mutex<HashMap<String, Vec<SessionCookie>>>,
    responses: Mutex<Vec<(String, Value)>>,
    evaluations: Mutex<Vec<(String, Vec<Value>)>>,
    navigations: Mutex<Vec<String>>,
    clicks: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    close_delay: Mutex<Duration>,
}

impl FakePage {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            jars: Mutex::new(HashMap::new()),
            responses: Mutex::new(Vec::new()),
            evaluations: Mutex::new(Vec::new()),
            navigations: Mutex::new(Vec::new()),
            clicks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            close_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_cookies(&self, url: &str, cookies: Vec<SessionCookie>) {
        self.jars.lock().insert(url.to_string(), cookies);
    }

    /// Return `value` from `evaluate` for scripts containing `needle`.
    pub fn respond(&self, needle: &str, value: Value) {
        self.responses.lock().push((needle.to_string(), value));
    }

    pub fn evaluations(&self) -> Vec<(String, Vec<Value>)> {
        self.evaluations.lock().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().clone()
    }

    /// Make `close` yield to the runtime for `delay` before the page is closed.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Browser("page is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.navigations.lock().push(url.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.ensure_open()?;
        self.clicks.lock().push(selector.to_string());
        Ok(())
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_open()?;
        if script == USER_AGENT_SCRIPT {
            return Ok(Value::String(self.user_agent.clone()));
        }
        self.evaluations.lock().push((script.to_string(), args));
        let responses = self.responses.lock();
        Ok(responses
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>> {
        self.ensure_open()?;
        Ok(self.jars.lock().get(url).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same page for every launch and records what was opened.
pub struct FakeLauncher {
    page: Arc<FakePage>,
    opened: Mutex<Vec<(String, PageOptions)>>,
}

impl FakeLauncher {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<(String, PageOptions)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn open_page(&self, url: &str, options: PageOptions) -> Result<Arc<dyn BrowserPage>> {
        self.opened.lock().push((url.to_string(), options));
        Ok(self.page.clone())
    }
}

/// Login that succeeds (or fails) without touching the page.
#[derive(Default)]
pub struct FakeLogin {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeLogin {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveLogin for FakeLogin {
    async fn login(
        &self,
        _page: &dyn BrowserPage,
        email: &str,
        _password: &str,
        _recovery: Option<&str>,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Browser(format!("login rejected for {}", email)));
        }
        Ok(())
    }
}
