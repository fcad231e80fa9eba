//! Generic account worker parameterised by a per-service strategy.

use std::future::Future;
use std::sync::Arc;

use genpool_accounts::{AccountPatch, AccountRecord, AccountStore};
use genpool_browser::{SessionBootstrapper, SessionProfile};
use genpool_core::{Error, LifecyclePolicy, Result};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::cdn::MediaRehost;
use crate::failure::FailureClass;
use crate::http::{ApiClient, FailureInterceptor};
use crate::lifecycle::{Clock, DestroyOptions, Lifecycle, WorkerState};
use crate::proxy::ProxyProvider;

/// What differs between services: where sessions come from, what is derived
/// from them and how failures are read.
pub trait Service: Send + Sync + 'static {
    fn profile() -> &'static SessionProfile;

    /// Values derived from freshly harvested cookies, persisted after bootstrap
    /// and after every session refresh.
    fn derive(_record: &AccountRecord) -> Result<AccountPatch> {
        Ok(AccountPatch::default())
    }

    fn classify(status: u16) -> FailureClass {
        FailureClass::from_status(status)
    }
}

/// Collaborators shared by every worker of a pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn AccountStore>,
    pub bootstrapper: Arc<SessionBootstrapper>,
    pub proxies: Arc<dyn ProxyProvider>,
    pub rehost: Arc<dyn MediaRehost>,
    pub policy: LifecyclePolicy,
    pub clock: Clock,
}

/// One account bound to one authenticated session.
pub struct Worker<S: Service> {
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) deps: WorkerDeps,
    pub(crate) service: S,
}

impl<S: Service> Worker<S> {
    pub fn new(account_id: &str, service: S, deps: WorkerDeps) -> Self {
        let lifecycle = Arc::new(Lifecycle::new(
            account_id,
            S::profile().service,
            deps.store.clone(),
            deps.policy.clone(),
            deps.clock.clone(),
            S::classify,
        ));
        Self {
            lifecycle,
            deps,
            service,
        }
    }

    pub fn id(&self) -> &str {
        self.lifecycle.account_id()
    }

    pub fn label(&self) -> &str {
        self.lifecycle.label()
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn record(&self) -> Result<AccountRecord> {
        self.lifecycle.record()
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Establish the session: bootstrap, derive, and become `Ready`.
    pub async fn init(&self) -> Result<()> {
        self.lifecycle.begin_bootstrap()?;

        let record = self.lifecycle.record()?;
        if record.email.is_empty() {
            return Err(Error::Configuration("email is required".into()));
        }
        let record = self.lifecycle.update(AccountPatch {
            destroyed: Some(false),
            ..Default::default()
        })?;

        let proxy = self.lifecycle.choose_proxy(&record, self.deps.proxies.as_ref());
        let session = self
            .deps
            .bootstrapper
            .bootstrap(self.deps.store.as_ref(), &record, S::profile(), proxy.as_deref())
            .await?;
        if let Some(page) = session.page {
            self.lifecycle.attach_page(page).await?;
        }

        let derived = S::derive(&session.record)?;
        if !derived.is_empty() {
            self.lifecycle.update(derived)?;
        }

        let profile = S::profile();
        if let (Some(interval), true) = (self.deps.policy.session_refresh_interval(), profile.keep_page) {
            self.lifecycle.spawn_refresh(profile, S::derive, interval);
        }

        self.lifecycle.finish_bootstrap()?;
        info!(worker = %self.label(), restored = session.restored, "Worker ready");
        Ok(())
    }

    /// Release everything after a failed `init`: forget the proxy and destroy.
    pub async fn init_failed(&self) {
        warn!(worker = %self.label(), "Init failed, releasing worker");
        self.lifecycle.clear_proxy();
        self.lifecycle.destroy(DestroyOptions::default()).await;
    }

    /// `init`, running `init_failed` before returning any error.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.init().await {
            self.init_failed().await;
            return Err(e);
        }
        Ok(())
    }

    /// Record that the pool handed this worker out.
    pub fn mark_used(&self) -> Result<()> {
        self.lifecycle.mark_used().map(|_| ())
    }

    pub async fn destroy(&self, options: DestroyOptions) -> bool {
        self.lifecycle.destroy(options).await
    }

    /// Run one API call in `Busy`, abandoning it when the worker is destroyed.
    pub(crate) async fn guarded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _call = self.lifecycle.begin_call()?;
        tokio::select! {
            biased;
            result = call => result,
            _ = self.lifecycle.cancelled() => Err(Error::Destroyed(self.label().to_string())),
        }
    }

    /// Client for `base_url` on this worker's proxy, built on first use.
    pub(crate) async fn client<'a>(&self, cell: &'a OnceCell<ApiClient>, base_url: &str) -> Result<&'a ApiClient> {
        cell.get_or_try_init(|| async {
            let interceptor: Arc<dyn FailureInterceptor> = self.lifecycle.clone();
            ApiClient::new(base_url, self.lifecycle.proxy().as_deref(), interceptor)
        })
        .await
    }
}
