use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BatchOp, ChangeStream, CommittedBatch, Entry, IterOptions, KeyValueStore};

/// Default capacity of the change-feed channel.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// In-memory, `BTreeMap`-based key-value store.
///
/// Intended for tests and embedding. The whole map sits behind one `RwLock`;
/// a batch is applied under the write lock and published before the lock is
/// released, so feed order equals commit order.
pub struct InMemoryKeyValueStore {
    name: String,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    destroyed: AtomicBool,
    changes: broadcast::Sender<CommittedBatch>,
}

impl InMemoryKeyValueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            name: name.into(),
            data: RwLock::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
            changes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all keys and values.
    pub fn total_bytes(&self) -> u64 {
        self.data
            .read()
            .map(|d| d.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
            .unwrap_or(0)
    }

    /// Drop all data and reject further use of this handle.
    pub(crate) fn destroy(&self) -> StoreResult<()> {
        let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;
        data.clear();
        self.destroyed.store(true, Ordering::SeqCst);
        debug!(store = %self.name, "store destroyed");
        Ok(())
    }

    fn ensure_live(&self) -> StoreResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(StoreError::Destroyed(self.name.clone()));
        }
        Ok(())
    }
}

fn lower_bound(options: &IterOptions) -> Bound<Vec<u8>> {
    match (&options.gt, &options.gte) {
        (Some(gt), _) => Bound::Excluded(gt.clone()),
        (None, Some(gte)) => Bound::Included(gte.clone()),
        (None, None) => Bound::Unbounded,
    }
}

fn upper_bound(options: &IterOptions) -> Bound<Vec<u8>> {
    match (&options.lt, &options.lte) {
        (Some(lt), _) => Bound::Excluded(lt.clone()),
        (None, Some(lte)) => Bound::Included(lte.clone()),
        (None, None) => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted bounds; detect them up front.
fn is_empty_interval(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        _ => false,
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.ensure_live()?;
        let data = self.data.read().map_err(|_| StoreError::LockPoisoned)?;
        data.get(key).cloned().ok_or_else(|| StoreError::not_found(key))
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.ensure_live()?;
        if ops.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;
        for op in &ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                BatchOp::Del { key } => {
                    data.remove(key);
                }
            }
        }

        let count = ops.len();
        // No subscribers is not an error.
        let _ = self.changes.send(Arc::new(ops));
        drop(data);

        debug!(store = %self.name, ops = count, "batch committed");
        Ok(())
    }

    async fn range(&self, options: &IterOptions) -> StoreResult<Vec<Entry>> {
        self.ensure_live()?;
        let lower = lower_bound(options);
        let upper = upper_bound(options);
        if is_empty_interval(&lower, &upper) || options.limit == Some(0) {
            return Ok(Vec::new());
        }

        let data = self.data.read().map_err(|_| StoreError::LockPoisoned)?;
        let limit = options.limit.unwrap_or(usize::MAX);
        let iter = data.range((lower, upper));
        let entries: Vec<Entry> = if options.reverse {
            iter.rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            iter.take(limit).map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        Ok(entries)
    }

    fn subscribe(&self) -> ChangeStream {
        self.changes.subscribe()
    }
}

impl std::fmt::Debug for InMemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyValueStore")
            .field("name", &self.name)
            .field("key_count", &self.len())
            .finish()
    }
}
