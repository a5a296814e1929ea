//! # In-flight Reconciliation Cancellation
//!
//! Each reconciliation attempt registers a [`CancellationToken`] under the resource uid.
//! When the resource's deletion timestamp appears, the watcher cancels it, which aborts an
//! outstanding token poll immediately instead of letting it run to its timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Entries {
    active: HashMap<String, (u64, CancellationToken)>,
}

/// Registry of cancellable attempts, keyed by resource uid
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<Entries>>,
    next_id: Arc<AtomicU64>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt for `uid` and return its guard
    ///
    /// A previous attempt still registered under the same uid is cancelled.
    pub fn register(&self, uid: &str) -> AttemptGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Ok(mut entries) = self.entries.lock() {
            if let Some((_, previous)) = entries
                .active
                .insert(uid.to_string(), (id, token.clone()))
            {
                previous.cancel();
            }
        }
        debug!(resource.uid = uid, "Registered reconciliation attempt");
        AttemptGuard {
            registry: self.clone(),
            uid: uid.to_string(),
            id,
            token,
        }
    }

    /// Cancel the attempt registered for `uid`
    /// Returns true if one was in flight.
    pub fn cancel(&self, uid: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.active.remove(uid));
        match removed {
            Some((_, token)) => {
                info!(resource.uid = uid, "Cancelling in-flight reconciliation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every attempt (shutdown)
    pub fn cancel_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let count = entries.active.len();
            if count > 0 {
                info!(count = count, "Cancelling all in-flight reconciliations");
            }
            for (_, (_, token)) in entries.active.drain() {
                token.cancel();
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.entries.lock().map(|e| e.active.len()).unwrap_or(0)
    }

    fn unregister(&self, uid: &str, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.active.get(uid).is_some_and(|(current, _)| *current == id) {
                entries.active.remove(uid);
            }
        }
    }
}

/// Registration of one attempt; unregisters on drop
#[derive(Debug)]
pub struct AttemptGuard {
    registry: CancellationRegistry,
    uid: String,
    id: u64,
    token: CancellationToken,
}

impl AttemptGuard {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.uid, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_token() {
        let registry = CancellationRegistry::new();
        let guard = registry.register("uid-1");

        assert!(registry.cancel("uid-1"));
        assert!(guard.token().is_cancelled());
        assert!(!registry.cancel("uid-1"));
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = CancellationRegistry::new();
        {
            let _guard = registry.register("uid-1");
            assert_eq!(registry.in_flight(), 1);
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_stale_guard_keeps_newer_attempt() {
        let registry = CancellationRegistry::new();
        let first = registry.register("uid-1");
        let second = registry.register("uid-1");

        assert!(first.token().is_cancelled());
        drop(first);
        assert_eq!(registry.in_flight(), 1);
        assert!(registry.cancel("uid-1"));
        assert!(second.token().is_cancelled());
    }

    #[test]
    fn test_cancel_all() {
        let registry = CancellationRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        registry.cancel_all();
        assert!(a.token().is_cancelled() && b.token().is_cancelled());
        assert_eq!(registry.in_flight(), 0);
    }
}
