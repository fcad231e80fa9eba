#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use genpool_accounts::{AccountRecord, AccountStore, JsonAccountStore, SessionCookie};
use genpool_browser::testing::{FakeLauncher, FakeLogin, FakePage};
use genpool_browser::{BootstrapConfig, SessionBootstrapper};
use genpool_core::{Error, LifecyclePolicy, Result};
use genpool_worker::{MediaRehost, ProxyProvider, Service, Worker, WorkerDeps};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const NOW: i64 = 1_700_000_000;
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Fake/1.0";

/// Records re-hosted URLs and answers with a CDN location.
#[derive(Default)]
pub struct RecordingRehost {
    pub seen: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl MediaRehost for RecordingRehost {
    async fn rehost(&self, url: &str) -> Result<String> {
        self.seen.lock().push(url.to_string());
        if self.fail {
            return Err(Error::Http("upload failed".into()));
        }
        Ok(format!("https://cdn.example/{}", url.rsplit('/').next().unwrap_or_default()))
    }
}

pub struct Harness<S: Service> {
    pub _dir: TempDir,
    pub store: Arc<JsonAccountStore>,
    pub page: Arc<FakePage>,
    pub launcher: Arc<FakeLauncher>,
    pub login: Arc<FakeLogin>,
    pub rehost: Arc<RecordingRehost>,
    pub worker: Worker<S>,
}

pub struct Setup {
    pub policy: LifecyclePolicy,
    pub proxies: Arc<dyn ProxyProvider>,
    pub rehost: RecordingRehost,
    pub login: FakeLogin,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            proxies: Arc::new(genpool_worker::DirectConnection),
            rehost: RecordingRehost::default(),
            login: FakeLogin::default(),
        }
    }
}

pub fn harness<S: Service>(record: AccountRecord, service: S, setup: Setup) -> Harness<S> {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonAccountStore::open(dir.path()).unwrap());
    let id = record.id.clone();
    store.insert(record).unwrap();

    let page = Arc::new(FakePage::new(USER_AGENT));
    let launcher = Arc::new(FakeLauncher::new(page.clone()));
    let login = Arc::new(setup.login);
    let rehost = Arc::new(setup.rehost);
    let bootstrapper = Arc::new(SessionBootstrapper::new(
        launcher.clone(),
        login.clone(),
        BootstrapConfig::immediate(),
    ));

    let deps = WorkerDeps {
        store: store.clone(),
        bootstrapper,
        proxies: setup.proxies,
        rehost: rehost.clone(),
        policy: setup.policy,
        clock: Arc::new(|| NOW),
    };

    Harness {
        _dir: dir,
        store,
        page,
        launcher,
        login,
        rehost,
        worker: Worker::new(&id, service, deps),
    }
}

impl<S: Service> Harness<S> {
    pub fn record(&self) -> AccountRecord {
        self.store.get(self.worker.id()).unwrap()
    }
}

pub fn cookie(name: &str, value: &str, domain: &str) -> SessionCookie {
    SessionCookie::new(name, value, domain)
}

/// URL-encoded Supabase login cookie value.
pub fn login_cookie_value(token: &str, user_id: &str) -> String {
    let json = serde_json::json!({
        "access_token": token,
        "token_type": "bearer",
        "user": { "id": user_id }
    });
    urlencoding::encode(&json.to_string()).into_owned()
}
