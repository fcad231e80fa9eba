//! Credential records for account workers.
//!
//! Each worker owns one [`AccountRecord`]. Records are mutated only through
//! [`AccountStore::update`], an atomic partial merge keyed by account id.

pub mod store;
pub mod types;

pub use store::{AccountStore, JsonAccountStore};
pub use types::*;
