//! Worker lifecycle controller: state machine, usage accounting and self-eviction.
//!
//! A worker moves `Uninitialized → Bootstrapping → Ready ⇄ Busy → Destroyed`.
//! Destruction is terminal and idempotent. Failure classification happens
//! here so that every transport of a worker (server-side HTTP or in-page
//! fetch) evicts the same way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genpool_accounts::{AccountPatch, AccountRecord, AccountStore};
use genpool_browser::{harvest, BrowserPage, SessionProfile};
use genpool_core::{Error, LifecyclePolicy, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::failure::FailureClass;
use crate::http::FailureInterceptor;
use crate::proxy::ProxyProvider;

/// Unix-seconds time source.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Post-harvest derivation hook of a service.
pub type Derive = fn(&AccountRecord) -> Result<AccountPatch>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Bootstrapping,
    Ready,
    /// At least one API call in flight.
    Busy,
    Destroyed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Remove the persisted record instead of marking it destroyed.
    pub delete_record: bool,
}

/// Per-worker lifecycle state shared by the worker, its API clients and its
/// refresh task.
pub struct Lifecycle {
    account_id: String,
    label: String,
    store: Arc<dyn AccountStore>,
    policy: LifecyclePolicy,
    clock: Clock,
    classify: fn(u16) -> FailureClass,
    state: Mutex<WorkerState>,
    in_flight: AtomicUsize,
    destroyed: AtomicBool,
    /// Serializes store writes against destruction.
    transition: Mutex<()>,
    /// Proxy chosen for this worker instance; outer `None` means not chosen yet.
    proxy: Mutex<Option<Option<String>>>,
    page: Mutex<Option<Arc<dyn BrowserPage>>>,
    /// Stops the refresh task; cancelled as soon as destruction starts.
    shutdown: CancellationToken,
    /// Cancelled once destruction has persisted and released the page.
    evicted: CancellationToken,
}

impl Lifecycle {
    pub fn new(
        account_id: &str,
        service: &str,
        store: Arc<dyn AccountStore>,
        policy: LifecyclePolicy,
        clock: Clock,
        classify: fn(u16) -> FailureClass,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            label: format!("{}/{}", service, account_id),
            store,
            policy,
            clock,
            classify,
            state: Mutex::new(WorkerState::Uninitialized),
            in_flight: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            transition: Mutex::new(()),
            proxy: Mutex::new(None),
            page: Mutex::new(None),
            shutdown: CancellationToken::new(),
            evicted: CancellationToken::new(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Resolves once the worker is destroyed and its page released.
    pub async fn cancelled(&self) {
        self.evicted.cancelled().await
    }

    fn gone(&self) -> Error {
        Error::Destroyed(self.label.clone())
    }

    /// Current persisted record.
    pub fn record(&self) -> Result<AccountRecord> {
        self.store
            .get(&self.account_id)
            .ok_or_else(|| Error::NotFound(format!("account {}", self.account_id)))
    }

    /// Write a partial update unless the worker has been destroyed.
    pub fn update(&self, patch: AccountPatch) -> Result<AccountRecord> {
        let _guard = self.transition.lock();
        if self.is_destroyed() {
            return Err(self.gone());
        }
        self.store.update(&self.account_id, patch)
    }

    /// Record one use: `last_use_time = now`, `use_count += 1`.
    pub fn mark_used(&self) -> Result<AccountRecord> {
        let now = self.now();
        self.update(AccountPatch {
            record_use: Some(now),
            ..Default::default()
        })
    }

    /// Proxy for this worker instance, chosen on first call and stable afterwards.
    pub fn choose_proxy(&self, record: &AccountRecord, provider: &dyn ProxyProvider) -> Option<String> {
        let mut chosen = self.proxy.lock();
        chosen
            .get_or_insert_with(|| record.proxy.clone().or_else(|| provider.select()))
            .clone()
    }

    pub fn proxy(&self) -> Option<String> {
        self.proxy.lock().clone().flatten()
    }

    /// Forget the proxy choice both in memory and in the record.
    pub fn clear_proxy(&self) {
        *self.proxy.lock() = None;
        if let Err(e) = self.update(AccountPatch {
            proxy: Some(None),
            ..Default::default()
        }) {
            warn!(worker = %self.label, "Failed to clear proxy: {}", e);
        }
    }

    pub fn begin_bootstrap(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            WorkerState::Uninitialized => {
                *state = WorkerState::Bootstrapping;
                Ok(())
            }
            WorkerState::Destroyed => Err(self.gone()),
            other => Err(Error::InvalidState(format!(
                "{} cannot initialise from {:?}",
                self.label, other
            ))),
        }
    }

    pub fn finish_bootstrap(&self) -> Result<()> {
        let _guard = self.transition.lock();
        if self.is_destroyed() {
            return Err(self.gone());
        }
        *self.state.lock() = WorkerState::Ready;
        Ok(())
    }

    /// Hold a live page for in-page calls. A page attached after destruction
    /// is closed immediately.
    pub async fn attach_page(&self, page: Arc<dyn BrowserPage>) -> Result<()> {
        let rejected = {
            let _guard = self.transition.lock();
            if self.is_destroyed() {
                Some(page)
            } else {
                *self.page.lock() = Some(page);
                None
            }
        };
        match rejected {
            Some(page) => {
                release(&self.label, page.as_ref()).await;
                Err(self.gone())
            }
            None => Ok(()),
        }
    }

    pub fn page(&self) -> Option<Arc<dyn BrowserPage>> {
        self.page.lock().clone()
    }

    /// Enter `Busy` for the lifetime of the returned guard.
    pub fn begin_call(&self) -> Result<CallGuard<'_>> {
        let mut state = self.state.lock();
        match *state {
            WorkerState::Ready | WorkerState::Busy => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                *state = WorkerState::Busy;
                Ok(CallGuard { lifecycle: self })
            }
            WorkerState::Destroyed => Err(self.gone()),
            other => Err(Error::InvalidState(format!(
                "{} is not ready ({:?})",
                self.label, other
            ))),
        }
    }

    fn end_call(&self) {
        let mut state = self.state.lock();
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 && *state == WorkerState::Busy {
            *state = WorkerState::Ready;
        }
    }

    /// Classify a non-2xx response, evicting on fatal classes.
    pub async fn handle_failure(&self, status: u16, body: String) -> Error {
        error!(worker = %self.label, status, body = %body, "Upstream request failed");

        match (self.classify)(status) {
            FailureClass::AuthExpired => {
                info!(worker = %self.label, "Session rejected, clearing cookies");
                let patch = AccountPatch {
                    cookies: Some(Vec::new()),
                    session_cookies: Some(Vec::new()),
                    ..Default::default()
                };
                self.teardown(patch, DestroyOptions::default()).await;
                Error::AuthExpired { status, body }
            }
            FailureClass::QuotaExhausted => {
                let suspended_until = self.policy.suspended_until(self.now());
                info!(worker = %self.label, suspended_until, "Quota exhausted, suspending account");
                let patch = AccountPatch {
                    suspended_until: Some(Some(suspended_until)),
                    ..Default::default()
                };
                self.teardown(patch, DestroyOptions::default()).await;
                Error::QuotaExhausted {
                    status,
                    suspended_until,
                }
            }
            FailureClass::Upstream => Error::Upstream { status, body },
        }
    }

    /// Destroy the worker. Returns false when it was already destroyed.
    pub async fn destroy(&self, options: DestroyOptions) -> bool {
        self.teardown(AccountPatch::default(), options).await
    }

    async fn teardown(&self, patch: AccountPatch, options: DestroyOptions) -> bool {
        let _evicted = {
            let _guard = self.transition.lock();
            if self.destroyed.swap(true, Ordering::SeqCst) {
                debug!(worker = %self.label, "Already destroyed");
                return false;
            }
            // Releases guarded calls when teardown returns, after the page is closed.
            let evicted = self.evicted.clone().drop_guard();
            self.shutdown.cancel();
            *self.state.lock() = WorkerState::Destroyed;

            if options.delete_record {
                if let Err(e) = self.store.remove(&self.account_id) {
                    error!(worker = %self.label, "Failed to delete record: {}", e);
                }
            } else {
                let patch = AccountPatch {
                    destroyed: Some(true),
                    ..patch
                };
                if let Err(e) = self.store.update(&self.account_id, patch) {
                    error!(worker = %self.label, "Failed to persist eviction: {}", e);
                }
            }
            evicted
        };
        info!(worker = %self.label, delete_record = options.delete_record, "Worker destroyed");

        let page = self.page.lock().take();
        if let Some(page) = page {
            release(&self.label, page.as_ref()).await;
        }
        true
    }

    /// Re-harvest cookies from the live page and re-run derivation.
    ///
    /// A session that no longer carries its primary cookie evicts the worker.
    pub async fn refresh_session(&self, profile: &SessionProfile, derive: Derive) -> Result<()> {
        let page = self
            .page()
            .ok_or_else(|| Error::InvalidState(format!("{} holds no page", self.label)))?;

        match self.reharvest(page.as_ref(), profile, derive).await {
            Err(Error::SessionIncomplete(msg)) => {
                warn!(worker = %self.label, "Session lost during refresh: {}", msg);
                let patch = AccountPatch {
                    cookies: Some(Vec::new()),
                    session_cookies: Some(Vec::new()),
                    ..Default::default()
                };
                self.teardown(patch, DestroyOptions::default()).await;
                Err(Error::SessionIncomplete(msg))
            }
            other => other,
        }
    }

    async fn reharvest(&self, page: &dyn BrowserPage, profile: &SessionProfile, derive: Derive) -> Result<()> {
        let harvested = harvest(page, profile).await?;
        let record = self.update(AccountPatch {
            cookies: Some(harvested.cookies),
            session_cookies: profile.session_slots.map(|_| harvested.session_cookies),
            user_agent: Some(harvested.user_agent),
            ..Default::default()
        })?;
        let derived = derive(&record)?;
        if !derived.is_empty() {
            self.update(derived)?;
        }
        debug!(worker = %self.label, "Session refreshed");
        Ok(())
    }

    /// Refresh the session every `interval` until the worker is destroyed.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        profile: &'static SessionProfile,
        derive: Derive,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = lifecycle.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = lifecycle.refresh_session(profile, derive).await {
                            warn!(worker = %lifecycle.label, "Session refresh failed: {}", e);
                        }
                    }
                }
            }
            debug!(worker = %lifecycle.label, "Refresh task stopped");
        })
    }
}

#[async_trait]
impl FailureInterceptor for Lifecycle {
    async fn on_failure(&self, status: u16, body: String) -> Error {
        self.handle_failure(status, body).await
    }
}

/// Keeps the worker `Busy` while alive.
pub struct CallGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.end_call();
    }
}

async fn release(label: &str, page: &dyn BrowserPage) {
    if let Err(e) = page.close().await {
        error!(worker = %label, "Failed to close browser: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use genpool_accounts::{JsonAccountStore, SessionCookie};
    use genpool_browser::testing::FakePage;
    use tempfile::TempDir;

    use super::*;
    use crate::proxy::ProxyRotation;

    const NOW: i64 = 1_700_000_000;

    fn setup() -> (TempDir, Arc<JsonAccountStore>, Lifecycle) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonAccountStore::open(dir.path()).unwrap());
        let mut record = AccountRecord::new("a1", "a@example.com", "pw");
        record.cookies = vec![SessionCookie::new("__client", "c", "clerk.flux1.ai")];
        store.insert(record).unwrap();

        let lifecycle = Lifecycle::new(
            "a1",
            "test",
            store.clone(),
            LifecyclePolicy::default(),
            Arc::new(|| NOW),
            FailureClass::from_status,
        );
        (dir, store, lifecycle)
    }

    fn ready(lifecycle: &Lifecycle) {
        lifecycle.begin_bootstrap().unwrap();
        lifecycle.finish_bootstrap().unwrap();
    }

    #[test]
    fn test_call_guard_moves_between_ready_and_busy() {
        let (_dir, _store, lifecycle) = setup();
        assert!(matches!(lifecycle.begin_call(), Err(Error::InvalidState(_))));
        ready(&lifecycle);

        let first = lifecycle.begin_call().unwrap();
        let second = lifecycle.begin_call().unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Busy);
        drop(first);
        assert_eq!(lifecycle.state(), WorkerState::Busy);
        drop(second);
        assert_eq!(lifecycle.state(), WorkerState::Ready);
    }

    #[test]
    fn test_double_init_rejected() {
        let (_dir, _store, lifecycle) = setup();
        ready(&lifecycle);
        assert!(matches!(lifecycle.begin_bootstrap(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_proxy_chosen_once() {
        let (_dir, store, lifecycle) = setup();
        let rotation = ProxyRotation::new(vec!["http://p1:8080".into(), "http://p2:8080".into()]);
        let record = store.get("a1").unwrap();

        assert_eq!(lifecycle.choose_proxy(&record, &rotation).as_deref(), Some("http://p1:8080"));
        assert_eq!(lifecycle.choose_proxy(&record, &rotation).as_deref(), Some("http://p1:8080"));

        lifecycle.clear_proxy();
        assert_eq!(lifecycle.choose_proxy(&record, &rotation).as_deref(), Some("http://p2:8080"));
    }

    #[tokio::test]
    async fn test_unauthorized_clears_cookies_and_destroys() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);

        let err = lifecycle.handle_failure(401, "signed out".into()).await;
        assert!(matches!(err, Error::AuthExpired { status: 401, .. }));
        assert!(lifecycle.is_destroyed());
        assert_eq!(lifecycle.state(), WorkerState::Destroyed);

        let record = store.get("a1").unwrap();
        assert!(record.cookies.is_empty());
        assert!(record.destroyed);
        assert!(!lifecycle.destroy(DestroyOptions::default()).await);
    }

    #[tokio::test]
    async fn test_payment_required_suspends_and_keeps_cookies() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);

        let err = lifecycle.handle_failure(402, "no credits".into()).await;
        assert!(matches!(
            err,
            Error::QuotaExhausted { status: 402, suspended_until } if suspended_until == NOW + 31_536_000
        ));

        let record = store.get("a1").unwrap();
        assert_eq!(record.suspended_until, Some(NOW + 31_536_000));
        assert_eq!(record.cookies.len(), 1);
        assert!(record.destroyed);
    }

    #[tokio::test]
    async fn test_other_status_survives() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);

        let err = lifecycle.handle_failure(500, "oops".into()).await;
        assert!(matches!(err, Error::Upstream { status: 500, ref body } if body == "oops"));
        assert!(!lifecycle.is_destroyed());
        assert!(!store.get("a1").unwrap().destroyed);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_releases_page() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);
        let page = Arc::new(FakePage::new("ua"));
        lifecycle.attach_page(page.clone()).await.unwrap();

        assert!(lifecycle.destroy(DestroyOptions::default()).await);
        assert!(!lifecycle.destroy(DestroyOptions::default()).await);
        assert_eq!(page.close_calls(), 1);
        assert!(store.get("a1").unwrap().destroyed);

        assert!(matches!(lifecycle.mark_used(), Err(Error::Destroyed(_))));
        assert!(matches!(lifecycle.begin_call(), Err(Error::Destroyed(_))));
    }

    #[tokio::test]
    async fn test_destroy_can_delete_record() {
        let (_dir, store, lifecycle) = setup();
        assert!(lifecycle.destroy(DestroyOptions { delete_record: true }).await);
        assert!(store.get("a1").is_none());
    }

    #[tokio::test]
    async fn test_page_attached_after_destroy_is_closed() {
        let (_dir, _store, lifecycle) = setup();
        lifecycle.destroy(DestroyOptions::default()).await;

        let page = Arc::new(FakePage::new("ua"));
        assert!(matches!(lifecycle.attach_page(page.clone()).await, Err(Error::Destroyed(_))));
        assert!(page.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_destroys_release_once() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);
        let page = Arc::new(FakePage::new("ua"));
        page.set_close_delay(Duration::from_millis(5));
        lifecycle.attach_page(page.clone()).await.unwrap();
        let lifecycle = Arc::new(lifecycle);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.destroy(DestroyOptions::default()).await })
            })
            .collect();
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(page.close_calls(), 1);
        assert!(page.is_closed());
        assert!(store.get("a1").unwrap().destroyed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_destroy_races_eviction_and_usage() {
        let (_dir, store, lifecycle) = setup();
        ready(&lifecycle);
        let page = Arc::new(FakePage::new("ua"));
        page.set_close_delay(Duration::from_millis(5));
        lifecycle.attach_page(page.clone()).await.unwrap();
        let lifecycle = Arc::new(lifecycle);

        let destroys: Vec<_> = (0..4)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.destroy(DestroyOptions::default()).await })
            })
            .collect();
        let evictions: Vec<_> = (0..4)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.handle_failure(401, "signed out".into()).await })
            })
            .collect();
        let uses: Vec<_> = (0..16)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.mark_used() })
            })
            .collect();

        let mut winners = 0;
        for task in destroys {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        for task in evictions {
            assert!(matches!(task.await.unwrap(), Error::AuthExpired { status: 401, .. }));
        }
        let mut counted = 0;
        for task in uses {
            match task.await.unwrap() {
                Ok(_) => counted += 1,
                Err(e) => assert!(matches!(e, Error::Destroyed(_))),
            }
        }

        assert!(winners <= 1);
        assert_eq!(page.close_calls(), 1);
        assert_eq!(lifecycle.state(), WorkerState::Destroyed);

        let record = store.get("a1").unwrap();
        assert!(record.destroyed);
        assert_eq!(record.use_count, counted);

        assert!(matches!(lifecycle.mark_used(), Err(Error::Destroyed(_))));
        assert!(!lifecycle.destroy(DestroyOptions::default()).await);
        assert_eq!(store.get("a1").unwrap().use_count, counted);
    }

    #[tokio::test]
    async fn test_cancelled_waits_for_page_release() {
        let (_dir, _store, lifecycle) = setup();
        ready(&lifecycle);
        let page = Arc::new(FakePage::new("ua"));
        page.set_close_delay(Duration::from_millis(5));
        lifecycle.attach_page(page.clone()).await.unwrap();
        let lifecycle = Arc::new(lifecycle);

        let waiter = {
            let lifecycle = lifecycle.clone();
            let page = page.clone();
            tokio::spawn(async move {
                lifecycle.cancelled().await;
                page.is_closed()
            })
        };
        assert!(lifecycle.destroy(DestroyOptions::default()).await);
        assert!(waiter.await.unwrap());
    }
}
