use std::fmt;
use std::sync::Arc;

use crate::cursor::Cursor;
use crate::error::StoreResult;
use crate::traits::{prefix_end, BatchOp, Entry, IterOptions, KeyValueStore};

/// A namespaced view over a shared [`KeyValueStore`].
///
/// Keys are stored as `!name!key`; nested sublevels concatenate prefixes.
/// Reads through a sublevel only ever see its own keys and return them with
/// the prefix stripped. Writes are expressed as [`BatchOp`]s carrying full
/// keys so that ops from many sublevels can be committed in one batch.
#[derive(Clone)]
pub struct Sublevel {
    store: Arc<dyn KeyValueStore>,
    prefix: Vec<u8>,
}

impl Sublevel {
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        Self {
            store,
            prefix: encode_prefix(&[], name),
        }
    }

    /// A sublevel nested inside this one.
    pub fn nested(&self, name: &str) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: encode_prefix(&self.prefix, name),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Full physical key for `key`.
    pub fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    /// The sublevel-relative key, if `full` belongs to this sublevel.
    pub fn strip<'a>(&self, full: &'a [u8]) -> Option<&'a [u8]> {
        full.strip_prefix(self.prefix.as_slice())
    }

    pub async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.store.get(&self.key(key)).await
    }

    pub async fn try_load(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.store.try_load(&self.key(key)).await
    }

    pub fn put_op(&self, key: &[u8], value: impl Into<Vec<u8>>) -> BatchOp {
        BatchOp::put(self.key(key), value)
    }

    pub fn del_op(&self, key: &[u8]) -> BatchOp {
        BatchOp::del(self.key(key))
    }

    /// Translate sublevel-relative bounds into physical bounds confined to
    /// this sublevel's key space.
    pub fn physical_options(&self, options: &IterOptions) -> IterOptions {
        let mut physical = IterOptions {
            limit: options.limit,
            reverse: options.reverse,
            ..Default::default()
        };

        match (&options.gt, &options.gte) {
            (Some(gt), _) => physical.gt = Some(self.key(gt)),
            (None, Some(gte)) => physical.gte = Some(self.key(gte)),
            (None, None) => physical.gte = Some(self.prefix.clone()),
        }
        match (&options.lt, &options.lte) {
            (Some(lt), _) => physical.lt = Some(self.key(lt)),
            (None, Some(lte)) => physical.lte = Some(self.key(lte)),
            (None, None) => physical.lt = prefix_end(&self.prefix),
        }

        physical
    }

    /// Range read with sublevel-relative bounds and keys.
    pub async fn range(&self, options: &IterOptions) -> StoreResult<Vec<Entry>> {
        let entries = self.store.range(&self.physical_options(options)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| self.strip(&k).map(|rel| (rel.to_vec(), v)))
            .collect())
    }

    /// Lazy paged iteration with sublevel-relative bounds and keys.
    pub fn cursor(&self, options: &IterOptions, page_size: usize) -> Cursor {
        Cursor::new(
            Arc::clone(&self.store),
            self.physical_options(options),
            page_size,
        )
        .strip_prefix(self.prefix.len())
    }
}

impl fmt::Debug for Sublevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sublevel({})", String::from_utf8_lossy(&self.prefix))
    }
}

fn encode_prefix(parent: &[u8], name: &str) -> Vec<u8> {
    let mut prefix = parent.to_vec();
    prefix.push(b'!');
    prefix.extend_from_slice(name.as_bytes());
    prefix.push(b'!');
    prefix
}

/// Collects ops from any number of sublevels of one store for a single
/// atomic commit.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, sublevel: &Sublevel, key: &[u8], value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(sublevel.put_op(key, value));
        self
    }

    pub fn del(&mut self, sublevel: &Sublevel, key: &[u8]) -> &mut Self {
        self.ops.push(sublevel.del_op(key));
        self
    }

    pub fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = BatchOp>) -> &mut Self {
        self.ops.extend(ops);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub async fn commit(self, store: &dyn KeyValueStore) -> StoreResult<()> {
        store.batch(self.ops).await
    }
}
