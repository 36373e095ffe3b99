//! Pointer-keyed waiter registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use poly_types::Pointer;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

/// Map from unresolved pointers to the contexts waiting on them.
///
/// Each registration fires at most once: [`WaiterRegistry::resolve`] sends the
/// pointer to every waiter registered for it and forgets them.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    next: AtomicU64,
    waiting: Mutex<HashMap<Pointer, Vec<(WaiterId, mpsc::UnboundedSender<Pointer>)>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pointer: Pointer, notify: mpsc::UnboundedSender<Pointer>) -> WaiterId {
        let id = WaiterId(self.next.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(pointer).or_default().push((id, notify));
        id
    }

    /// Drop one registration without firing it.
    pub fn remove(&self, id: WaiterId, pointer: &Pointer) {
        let mut waiting = self.lock();
        if let Some(list) = waiting.get_mut(pointer) {
            list.retain(|(w, _)| *w != id);
            if list.is_empty() {
                waiting.remove(pointer);
            }
        }
    }

    /// Fire and clear every waiter on `pointer`. Returns how many fired.
    pub fn resolve(&self, pointer: &Pointer) -> usize {
        let Some(list) = self.lock().remove(pointer) else {
            return 0;
        };
        let fired = list.len();
        for (_, notify) in list {
            let _ = notify.send(*pointer);
        }
        debug!(%pointer, fired, "waiters resolved");
        fired
    }

    /// Pointers with at least one waiter.
    pub fn pending(&self) -> Vec<Pointer> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Pointer, Vec<(WaiterId, mpsc::UnboundedSender<Pointer>)>>>
    {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use poly_types::{Process, PublicKey};

    use super::*;

    fn pointer(clock: u64) -> Pointer {
        Pointer::new(
            PublicKey::from_bytes([1; 32]),
            Process::from_bytes([2; 16]),
            clock,
        )
    }

    #[test]
    fn resolve_fires_once_then_clears() {
        let registry = WaiterRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(pointer(1), tx.clone());
        registry.register(pointer(1), tx);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.resolve(&pointer(1)), 2);
        assert_eq!(registry.resolve(&pointer(1)), 0);
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().unwrap(), pointer(1));
        assert_eq!(rx.try_recv().unwrap(), pointer(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removed_waiters_do_not_fire() {
        let registry = WaiterRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(pointer(3), tx);
        registry.remove(id, &pointer(3));
        assert!(registry.pending().is_empty());
        assert_eq!(registry.resolve(&pointer(3)), 0);
        assert!(rx.try_recv().is_err());
    }
}
