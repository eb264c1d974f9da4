//! Per-namespace cancellation tokens.
//!
//! Each running turn gets a `CancelToken`. Calling `cancel()` signals the
//! executor, the tool loop, and any in-flight handlers to stop cleanly at
//! the next suspension point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the runtime at every suspension point.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks the active cancellation token per user namespace.
///
/// At most one turn runs per namespace, so a namespace maps to at most one
/// live token.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a namespace, replacing any stale one.
    pub fn register(&self, namespace: &str, token: CancelToken) {
        self.tokens.lock().insert(namespace.to_owned(), token);
    }

    /// Cancel the running turn for a namespace. Returns true if a token
    /// was found.
    pub fn cancel(&self, namespace: &str) -> bool {
        match self.tokens.lock().get(namespace) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, namespace: &str) {
        self.tokens.lock().remove(namespace);
    }

    /// Check whether a namespace has an active turn.
    pub fn is_running(&self, namespace: &str) -> bool {
        self.tokens.lock().contains_key(namespace)
    }
}
