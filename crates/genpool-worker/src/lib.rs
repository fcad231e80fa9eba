//! Account workers for generation services.
//!
//! A [`Worker`] owns one account: it bootstraps a browser session, derives
//! per-request auth material, calls the service API and evicts itself when
//! the service reports the session or the balance as gone.

pub mod auth;
pub mod cdn;
pub mod failure;
pub mod http;
pub mod ideogram;
pub mod lifecycle;
pub mod pika;
pub mod proxy;
pub mod worker;

pub use cdn::{MediaRehost, PassthroughRehost};
pub use failure::FailureClass;
pub use http::{ApiClient, FailureInterceptor};
pub use ideogram::{Ideogram, IdeogramConfig, PredictionsRequest, PredictionsResponse, ResultResponse};
pub use lifecycle::{system_clock, Clock, DestroyOptions, Lifecycle, WorkerState};
pub use pika::{LibraryVideo, PageRequest, Pika, PikaConfig};
pub use proxy::{DirectConnection, ProxyProvider, ProxyRotation};
pub use worker::{Service, Worker, WorkerDeps};
