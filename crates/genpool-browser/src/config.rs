//! Bootstrap timing configuration.

use std::time::Duration;

use genpool_core::LifecyclePolicy;
use serde::{Deserialize, Serialize};

/// Timing knobs for the session bootstrapper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Pause after login; cookie issuance is asynchronous to navigation.
    #[serde(default = "default_settle")]
    pub settle_delay: Duration,
    #[serde(default = "default_selector_timeout")]
    pub selector_timeout: Duration,
}

fn default_settle() -> Duration {
    LifecyclePolicy::default().login_settle_delay()
}
fn default_selector_timeout() -> Duration {
    LifecyclePolicy::default().selector_timeout()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::from_policy(&LifecyclePolicy::default())
    }
}

impl BootstrapConfig {
    pub fn from_policy(policy: &LifecyclePolicy) -> Self {
        Self {
            settle_delay: policy.login_settle_delay(),
            selector_timeout: policy.selector_timeout(),
        }
    }

    /// No settle delay; used where cookies are available immediately.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
