//! Proxy selection boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a proxy for a worker that has none persisted.
pub trait ProxyProvider: Send + Sync {
    fn select(&self) -> Option<String>;
}

/// No proxy; connect directly.
pub struct DirectConnection;

impl ProxyProvider for DirectConnection {
    fn select(&self) -> Option<String> {
        None
    }
}

/// Round-robin over a fixed list of proxy URLs.
pub struct ProxyRotation {
    proxies: Vec<String>,
    next: AtomicUsize,
}

impl ProxyRotation {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            next: AtomicUsize::new(0),
        }
    }
}

impl ProxyProvider for ProxyRotation {
    fn select(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[i].clone())
    }
}
