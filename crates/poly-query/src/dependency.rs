use std::sync::Arc;

use poly_types::Pointer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::waiters::{WaiterId, WaiterRegistry};

/// Pointers a derived value needed but could not find locally.
///
/// Each dependency is a waiter in the shared [`WaiterRegistry`]. The first
/// one to resolve wakes [`DependencyContext::wait`] or runs the handler set
/// with [`DependencyContext::set_handler`], exactly once. `cleanup` releases
/// every registration; dropping the context does the same.
#[derive(Debug)]
pub struct DependencyContext {
    waiters: Arc<WaiterRegistry>,
    registered: Vec<(WaiterId, Pointer)>,
    notify: mpsc::UnboundedSender<Pointer>,
    resolved: Option<mpsc::UnboundedReceiver<Pointer>>,
    handler: Option<JoinHandle<()>>,
}

impl DependencyContext {
    pub fn new(waiters: Arc<WaiterRegistry>) -> Self {
        let (notify, resolved) = mpsc::unbounded_channel();
        Self {
            waiters,
            registered: Vec::new(),
            notify,
            resolved: Some(resolved),
            handler: None,
        }
    }

    pub fn add_dependency(&mut self, pointer: Pointer) {
        if self.registered.iter().any(|(_, p)| *p == pointer) {
            return;
        }
        let id = self.waiters.register(pointer, self.notify.clone());
        self.registered.push((id, pointer));
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Pointer> {
        self.registered.iter().map(|(_, p)| p)
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Run `handler` with the first dependency that resolves.
    ///
    /// Only one handler may be installed, and it excludes [`wait`]. Returns
    /// `false` if the context was already claimed. Must be called inside a
    /// tokio runtime.
    ///
    /// [`wait`]: DependencyContext::wait
    pub fn set_handler<F>(&mut self, handler: F) -> bool
    where
        F: FnOnce(Pointer) + Send + 'static,
    {
        let Some(mut resolved) = self.resolved.take() else {
            return false;
        };
        self.handler = Some(tokio::spawn(async move {
            if let Some(pointer) = resolved.recv().await {
                handler(pointer);
            }
        }));
        true
    }

    /// Wait for the first dependency to resolve.
    ///
    /// Returns `None` immediately when nothing is tracked or a handler owns
    /// the context.
    pub async fn wait(&mut self) -> Option<Pointer> {
        if self.registered.is_empty() {
            return None;
        }
        self.resolved.as_mut()?.recv().await
    }

    /// Release every waiter and stop a pending handler.
    pub fn cleanup(&mut self) {
        for (id, pointer) in self.registered.drain(..) {
            self.waiters.remove(id, &pointer);
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for DependencyContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use poly_types::{Process, PublicKey};

    use super::*;

    fn pointer(clock: u64) -> Pointer {
        Pointer::new(
            PublicKey::from_bytes([5; 32]),
            Process::from_bytes([6; 16]),
            clock,
        )
    }

    #[tokio::test]
    async fn handler_fires_exactly_once() {
        let waiters = Arc::new(WaiterRegistry::new());
        let mut ctx = DependencyContext::new(Arc::clone(&waiters));
        ctx.add_dependency(pointer(1));
        ctx.add_dependency(pointer(2));
        ctx.add_dependency(pointer(2));
        assert_eq!(waiters.len(), 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        assert!(ctx.set_handler(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!ctx.set_handler(|_| {}));

        waiters.resolve(&pointer(1));
        waiters.resolve(&pointer(2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_returns_resolved_pointer() {
        let waiters = Arc::new(WaiterRegistry::new());
        let mut ctx = DependencyContext::new(Arc::clone(&waiters));
        assert_eq!(ctx.wait().await, None);

        ctx.add_dependency(pointer(7));
        let resolver = Arc::clone(&waiters);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            resolver.resolve(&pointer(7));
        });
        assert_eq!(ctx.wait().await, Some(pointer(7)));
    }

    #[tokio::test]
    async fn cleanup_and_drop_release_waiters() {
        let waiters = Arc::new(WaiterRegistry::new());
        let mut ctx = DependencyContext::new(Arc::clone(&waiters));
        ctx.add_dependency(pointer(1));
        ctx.cleanup();
        assert!(waiters.is_empty());
        assert!(ctx.is_empty());

        {
            let mut scoped = DependencyContext::new(Arc::clone(&waiters));
            scoped.add_dependency(pointer(2));
            assert_eq!(waiters.len(), 1);
        }
        assert!(waiters.is_empty());
    }
}
