use std::sync::Arc;

use poly_log::keys::system_key;
use poly_types::{CancelContext, CancelToken, ContentType, CrdtItem, PublicKey, SystemState};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::QueryResult;
use crate::manager::{QueryHandle, Shared};
use crate::state::StateCell;

type CrdtCallback = Box<dyn Fn(Option<CrdtItem>) + Send + Sync>;

/// A routed `(system, content type)` subscription.
pub(crate) struct CrdtSubscription {
    system: PublicKey,
    content_type: ContentType,
    key: Vec<u8>,
    callback: CrdtCallback,
    last: Mutex<Option<CrdtItem>>,
    state: Arc<StateCell>,
    owner: CancelToken,
    handle: CancelToken,
}

impl CrdtSubscription {
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn system(&self) -> &PublicKey {
        &self.system
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        if self.owner.is_cancelled() || self.handle.is_cancelled() {
            self.state.cancel();
        }
        self.state.is_cancelled()
    }

    /// Deliver the item from `state` if it supersedes the last delivered one.
    pub(crate) async fn update(&self, state: &SystemState) {
        let item = state.crdt_item(self.content_type).cloned();
        let mut last = self.last.lock().await;
        if !supersedes(last.as_ref(), item.as_ref()) || self.is_cancelled() {
            return;
        }
        if !self.state.invalidate() {
            return;
        }
        *last = item.clone();
        debug!(system = %self.system, content_type = %self.content_type, "crdt query updated");
        (self.callback)(item);
        self.state.resolve();
    }
}

/// LWW items only ever move forward in time, so a later timestamp is the
/// only change worth delivering.
fn supersedes(last: Option<&CrdtItem>, next: Option<&CrdtItem>) -> bool {
    match (last, next) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(a), Some(b)) => b.unix_milliseconds > a.unix_milliseconds,
    }
}

/// Live queries over LWW fields of an identity's state.
#[derive(Clone)]
pub struct QueryCrdt {
    shared: Arc<Shared>,
}

impl QueryCrdt {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The current item, read once.
    pub async fn current(
        &self,
        system: &PublicKey,
        content_type: ContentType,
    ) -> QueryResult<Option<CrdtItem>> {
        let state = self.shared.log.load_system_state(system).await?;
        Ok(state.and_then(|s| s.crdt_item(content_type).cloned()))
    }

    /// Subscribe to one field.
    ///
    /// `callback` runs before this returns with the current item (`None`
    /// when unset), then once for every committed batch that replaces it.
    /// Callbacks stop when the handle is unregistered or dropped, or when
    /// `cancel` fires.
    pub async fn query<F>(
        &self,
        system: PublicKey,
        content_type: ContentType,
        cancel: &CancelToken,
        callback: F,
    ) -> QueryResult<QueryHandle>
    where
        F: Fn(Option<CrdtItem>) + Send + Sync + 'static,
    {
        cancel.ensure_active()?;
        let own = CancelContext::new();
        let subscription = Arc::new(CrdtSubscription {
            system,
            content_type,
            key: self.shared.log.system_states_level().key(&system_key(&system)),
            callback: Box::new(callback),
            last: Mutex::new(None),
            state: Arc::new(StateCell::new()),
            owner: cancel.clone(),
            handle: own.token(),
        });

        // Hold the delivery lock until the first callback so a batch that
        // lands meanwhile is compared against what we deliver here.
        let mut last = subscription.last.lock().await;
        let id = self.shared.next_id();
        self.shared.route(id, Arc::clone(&subscription));
        let handle =
            QueryHandle::routed(id, &self.shared, Arc::clone(&subscription.state), own);

        let current = self.current(&system, content_type).await?;
        cancel.ensure_active()?;
        if supersedes(last.as_ref(), current.as_ref()) {
            *last = current;
        }
        (subscription.callback)(last.clone());
        if last.is_some() {
            subscription.state.resolve();
        }
        drop(last);
        Ok(handle)
    }

    /// [`QueryCrdt::query`] with values decoded from bincode. A value that
    /// fails to decode is delivered as `None`.
    pub async fn query_decoded<T, F>(
        &self,
        system: PublicKey,
        content_type: ContentType,
        cancel: &CancelToken,
        callback: F,
    ) -> QueryResult<QueryHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        self.query(system, content_type, cancel, move |item| {
            let decoded = item.and_then(|item| match bincode::deserialize(&item.value) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(%content_type, error = %e, "crdt value did not decode");
                    None
                }
            });
            callback(decoded);
        })
        .await
    }
}

impl std::fmt::Debug for QueryCrdt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCrdt").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use poly_crypto::SigningKey;
    use poly_log::EventLog;
    use poly_store::InMemoryKeyValueStore;
    use poly_types::{LwwElement, Process};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::QueryConfig;
    use crate::manager::QueryManager;
    use crate::state::SubscriptionState;

    fn manager() -> QueryManager {
        let store = Arc::new(InMemoryKeyValueStore::new("crdt"));
        QueryManager::new(Arc::new(EventLog::new(store)), &QueryConfig::default())
    }

    async fn set(
        manager: &QueryManager,
        key: &SigningKey,
        content_type: ContentType,
        value: &[u8],
        at: u64,
    ) {
        manager
            .log()
            .author(
                key,
                &Process::from_bytes([1; 16]),
                content_type,
                value.to_vec(),
                Some(LwwElement::new(value.to_vec(), at)),
            )
            .await
            .unwrap();
    }

    fn values(rx: &mut mpsc::UnboundedReceiver<Option<Vec<u8>>>) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn subscriber() -> (
        mpsc::UnboundedReceiver<Option<Vec<u8>>>,
        impl Fn(Option<CrdtItem>) + Send + Sync + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rx, move |item: Option<CrdtItem>| {
            let _ = tx.send(item.map(|i| i.value));
        })
    }

    #[tokio::test]
    async fn fires_immediately_then_on_change() {
        let manager = manager();
        let key = SigningKey::generate();
        let (mut rx, callback) = subscriber();
        let handle = manager
            .crdt()
            .query(key.system(), ContentType::USERNAME, &CancelToken::never(), callback)
            .await
            .unwrap();
        assert_eq!(values(&mut rx), vec![None]);
        assert_eq!(handle.state(), SubscriptionState::Pending);

        set(&manager, &key, ContentType::USERNAME, b"alice", 100).await;
        settle().await;
        assert_eq!(values(&mut rx), vec![Some(b"alice".to_vec())]);
        assert_eq!(handle.state(), SubscriptionState::Resolved);
    }

    #[tokio::test]
    async fn older_timestamp_does_not_fire() {
        let manager = manager();
        let key = SigningKey::generate();
        set(&manager, &key, ContentType::USERNAME, b"alice", 100).await;

        let (mut rx, callback) = subscriber();
        let _handle = manager
            .crdt()
            .query(key.system(), ContentType::USERNAME, &CancelToken::never(), callback)
            .await
            .unwrap();
        set(&manager, &key, ContentType::USERNAME, b"alicia", 50).await;
        settle().await;

        assert_eq!(values(&mut rx), vec![Some(b"alice".to_vec())]);
        let current = manager
            .crdt()
            .current(&key.system(), ContentType::USERNAME)
            .await
            .unwrap();
        assert_eq!(current.unwrap().value, b"alice".to_vec());
    }

    #[tokio::test]
    async fn other_fields_do_not_fire() {
        let manager = manager();
        let key = SigningKey::generate();
        let (mut rx, callback) = subscriber();
        let _handle = manager
            .crdt()
            .query(key.system(), ContentType::USERNAME, &CancelToken::never(), callback)
            .await
            .unwrap();
        set(&manager, &key, ContentType::DESCRIPTION, b"hi there", 10).await;
        settle().await;
        assert_eq!(values(&mut rx), vec![None]);
    }

    #[tokio::test]
    async fn unregister_stops_callbacks() {
        let manager = manager();
        let key = SigningKey::generate();
        let (mut rx, callback) = subscriber();
        let handle = manager
            .crdt()
            .query(key.system(), ContentType::USERNAME, &CancelToken::never(), callback)
            .await
            .unwrap();
        assert_eq!(manager.subscription_count(), 1);
        let token = handle.token();
        handle.unregister();
        assert!(token.is_cancelled());
        assert_eq!(manager.subscription_count(), 0);

        set(&manager, &key, ContentType::USERNAME, b"alice", 100).await;
        settle().await;
        assert_eq!(values(&mut rx), vec![None]);
    }

    #[tokio::test]
    async fn owner_cancel_stops_callbacks() {
        let manager = manager();
        let key = SigningKey::generate();
        let owner = CancelContext::new();
        let (mut rx, callback) = subscriber();
        let handle = manager
            .crdt()
            .query(key.system(), ContentType::USERNAME, &owner.token(), callback)
            .await
            .unwrap();
        owner.cancel();

        set(&manager, &key, ContentType::USERNAME, b"alice", 100).await;
        settle().await;
        assert_eq!(values(&mut rx), vec![None]);
        assert_eq!(handle.state(), SubscriptionState::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_owner_is_refused() {
        let manager = manager();
        let owner = CancelContext::new();
        owner.cancel();
        let (_rx, callback) = subscriber();
        let err = manager
            .crdt()
            .query(
                SigningKey::generate().system(),
                ContentType::USERNAME,
                &owner.token(),
                callback,
            )
            .await
            .unwrap_err();
        assert_eq!(err, crate::QueryError::Cancelled);
        assert_eq!(manager.subscription_count(), 0);
    }

    #[tokio::test]
    async fn decoded_values() {
        let manager = manager();
        let key = SigningKey::generate();
        let encoded = bincode::serialize(&"alice".to_string()).unwrap();
        set(&manager, &key, ContentType::USERNAME, &encoded, 5).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager
            .crdt()
            .query_decoded(
                key.system(),
                ContentType::USERNAME,
                &CancelToken::never(),
                move |name: Option<String>| {
                    let _ = tx.send(name);
                },
            )
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), Some("alice".to_string()));
    }
}
