//! genpool core: error taxonomy, lifecycle policy, configuration.

pub mod config;
pub mod error;

pub use config::{DataPaths, GenpoolConfig, LifecyclePolicy};
pub use error::{Error, Result};
