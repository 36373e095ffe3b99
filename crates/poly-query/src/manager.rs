use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use poly_log::keys::parse_pointer_key;
use poly_log::EventLog;
use poly_store::{BatchOp, ChangeStream, CommittedBatch};
use poly_types::{CancelContext, CancelToken, Pointer, SystemState};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blob::QueryBlob;
use crate::config::QueryConfig;
use crate::crdt::{CrdtSubscription, QueryCrdt};
use crate::state::{StateCell, SubscriptionState};
use crate::waiters::WaiterRegistry;

pub(crate) type SubscriptionId = u64;

/// State shared between the manager, its listener task and query handles.
pub(crate) struct Shared {
    pub(crate) log: Arc<EventLog>,
    pub(crate) waiters: Arc<WaiterRegistry>,
    routes: Mutex<HashMap<SubscriptionId, Arc<CrdtSubscription>>>,
    arrivals: broadcast::Sender<Pointer>,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn next_id(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn route(&self, id: SubscriptionId, subscription: Arc<CrdtSubscription>) {
        self.lock_routes().insert(id, subscription);
    }

    pub(crate) fn unroute(&self, id: SubscriptionId) {
        self.lock_routes().remove(&id);
    }

    fn lock_routes(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Arc<CrdtSubscription>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one committed batch: resolve waiters for stored events, then
    /// refresh CRDT subscriptions whose state row changed.
    async fn dispatch(&self, batch: &[BatchOp]) {
        let events = self.log.events_level();
        let states = self.log.system_states_level();
        let mut touched: Vec<(&[u8], &[u8])> = Vec::new();

        for op in batch {
            let BatchOp::Put { key, value } = op else {
                continue;
            };
            if let Some(relative) = events.strip(key) {
                match parse_pointer_key(relative) {
                    Ok(pointer) => {
                        self.waiters.resolve(&pointer);
                        let _ = self.arrivals.send(pointer);
                    }
                    Err(e) => warn!(error = %e, "unreadable event key on change feed"),
                }
            } else if states.strip(key).is_some() {
                touched.push((key.as_slice(), value.as_slice()));
            }
        }

        if touched.is_empty() {
            return;
        }
        for subscription in self.live_subscriptions() {
            let Some((_, value)) = touched.iter().find(|(k, _)| *k == subscription.key()) else {
                continue;
            };
            match SystemState::decode(value) {
                Ok(state) => subscription.update(&state).await,
                Err(e) => warn!(error = %e, "undecodable system state on change feed"),
            }
        }
    }

    /// Recover after the change feed dropped batches: re-read every routed
    /// state and every awaited pointer from the store.
    async fn resync(&self) {
        for subscription in self.live_subscriptions() {
            match self.log.load_system_state(subscription.system()).await {
                Ok(Some(state)) => subscription.update(&state).await,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "resync read failed"),
            }
        }
        for pointer in self.waiters.pending() {
            if let Ok(Some(_)) = self.log.load_event(&pointer).await {
                self.waiters.resolve(&pointer);
            }
        }
    }

    /// Routed subscriptions, with cancelled ones pruned.
    fn live_subscriptions(&self) -> Vec<Arc<CrdtSubscription>> {
        let mut routes = self.lock_routes();
        routes.retain(|_, s| !s.is_cancelled());
        routes.values().cloned().collect()
    }
}

/// Live query service for one identity store.
///
/// A single listener task consumes the store's change feed and dispatches
/// each committed batch to the waiters and subscriptions it affects.
/// Dropping the manager stops the listener; handles outlive it harmlessly.
pub struct QueryManager {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl QueryManager {
    /// Start the listener. Must be called inside a tokio runtime.
    pub fn new(log: Arc<EventLog>, config: &QueryConfig) -> Self {
        let stream = log.store().subscribe();
        let (arrivals, _) = broadcast::channel(config.channel_capacity.max(1));
        let shared = Arc::new(Shared {
            log,
            waiters: Arc::new(WaiterRegistry::new()),
            routes: Mutex::new(HashMap::new()),
            arrivals,
            next_id: AtomicU64::new(0),
        });
        let listener = tokio::spawn(listen(Arc::downgrade(&shared), stream));
        info!("query manager started");
        Self { shared, listener }
    }

    pub fn crdt(&self) -> QueryCrdt {
        QueryCrdt::new(Arc::clone(&self.shared))
    }

    pub fn blob(&self) -> QueryBlob {
        QueryBlob::new(Arc::clone(&self.shared))
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.shared.log
    }

    pub fn waiters(&self) -> &Arc<WaiterRegistry> {
        &self.shared.waiters
    }

    /// Pointers of events as they are stored.
    pub fn arrivals(&self) -> broadcast::Receiver<Pointer> {
        self.shared.arrivals.subscribe()
    }

    /// Number of routed CRDT subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.live_subscriptions().len()
    }
}

impl Drop for QueryManager {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl std::fmt::Debug for QueryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryManager")
            .field("waiters", &self.shared.waiters.len())
            .finish_non_exhaustive()
    }
}

async fn listen(shared: Weak<Shared>, mut stream: ChangeStream) {
    loop {
        let received: Result<CommittedBatch, RecvError> = stream.recv().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match received {
            Ok(batch) => shared.dispatch(&batch).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change feed lagged, resyncing queries");
                shared.resync().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("query listener stopped");
}

enum Registration {
    Routed(SubscriptionId, Weak<Shared>),
    Task(JoinHandle<()>),
}

/// Owner of one live query. `unregister` or drop ends it.
pub struct QueryHandle {
    state: Arc<StateCell>,
    cancel: CancelContext,
    registration: Option<Registration>,
}

impl QueryHandle {
    pub(crate) fn routed(
        id: SubscriptionId,
        shared: &Arc<Shared>,
        state: Arc<StateCell>,
        cancel: CancelContext,
    ) -> Self {
        Self {
            state,
            cancel,
            registration: Some(Registration::Routed(id, Arc::downgrade(shared))),
        }
    }

    pub(crate) fn task(task: JoinHandle<()>, state: Arc<StateCell>, cancel: CancelContext) -> Self {
        Self {
            state,
            cancel,
            registration: Some(Registration::Task(task)),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    /// Token observing this handle; cancelled once it is unregistered.
    pub fn token(&self) -> CancelToken {
        self.cancel.token()
    }

    /// Stop the query. No callback runs after this returns.
    pub fn unregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.cancel.cancel();
        self.state.cancel();
        match self.registration.take() {
            Some(Registration::Routed(id, shared)) => {
                if let Some(shared) = shared.upgrade() {
                    shared.unroute(id);
                }
            }
            Some(Registration::Task(task)) => task.abort(),
            None => {}
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use poly_crypto::{sign_event, SigningKey};
    use poly_store::{InMemoryKeyValueStore, KeyValueStore};
    use poly_types::{ContentType, Event, Process};

    use super::*;

    fn manager() -> QueryManager {
        let store = Arc::new(InMemoryKeyValueStore::new("queries"));
        QueryManager::new(Arc::new(EventLog::new(store)), &QueryConfig::default())
    }

    fn post(key: &SigningKey, clock: u64) -> poly_types::SignedEvent {
        let event = Event {
            system: key.system(),
            process: Process::from_bytes([1; 16]),
            logical_clock: clock,
            content_type: ContentType::POST,
            content: vec![clock as u8],
            lww_element: None,
            indices: vec![],
        };
        sign_event(key, &event).unwrap()
    }

    #[tokio::test]
    async fn stored_events_resolve_waiters_and_announce_arrivals() {
        let manager = manager();
        let key = SigningKey::generate();
        let event = post(&key, 0);
        let pointer = event.decode_event().unwrap().pointer();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.waiters().register(pointer, tx);
        let mut arrivals = manager.arrivals();

        manager.log().save(&event).await.unwrap();
        let resolved = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(resolved, Some(pointer));
        assert_eq!(arrivals.recv().await.unwrap(), pointer);
        assert!(manager.waiters().is_empty());
    }

    #[tokio::test]
    async fn unrelated_batches_are_ignored() {
        let manager = manager();
        manager
            .log()
            .store()
            .put(b"elsewhere", b"value")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.subscription_count(), 0);
        assert!(manager.waiters().is_empty());
    }
}
