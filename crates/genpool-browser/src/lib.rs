//! Browser session bootstrap: login or cookie restore, harvest, persist.
//!
//! The headless browser and the third-party login flow are consumed through
//! the traits in [`driver`]; [`SessionBootstrapper`] turns them into a
//! persisted, authenticated session for one account.

pub mod bootstrap;
pub mod config;
pub mod driver;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod types;

pub use bootstrap::{harvest, BootstrappedSession, SessionBootstrapper};
pub use config::BootstrapConfig;
pub use driver::{BrowserLauncher, BrowserPage, InteractiveLogin};
pub use types::*;
