use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};

/// A key/value pair returned by range reads.
pub type Entry = (Vec<u8>, Vec<u8>);

/// One mutation inside an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Vec<u8>>) -> Self {
        Self::Del { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Del { key } => key,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Put { value, .. } => Some(value),
            Self::Del { .. } => None,
        }
    }
}

/// A batch as published on the change feed after it committed.
pub type CommittedBatch = Arc<Vec<BatchOp>>;

/// Receiving side of a store's change feed. Dropping it unsubscribes.
pub type ChangeStream = broadcast::Receiver<CommittedBatch>;

/// Bounds and direction for a range read.
///
/// When both `gt` and `gte` are set, `gt` wins; likewise `lt` over `lte`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterOptions {
    pub gt: Option<Vec<u8>>,
    pub gte: Option<Vec<u8>>,
    pub lt: Option<Vec<u8>>,
    pub lte: Option<Vec<u8>>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl IterOptions {
    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            gte: Some(prefix.to_vec()),
            lt: prefix_end(prefix),
            ..Default::default()
        }
    }

    pub fn gt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Whether `key` falls inside the bounds (ignores `limit`).
    pub fn admits(&self, key: &[u8]) -> bool {
        let lower_ok = match (&self.gt, &self.gte) {
            (Some(gt), _) => key > gt.as_slice(),
            (None, Some(gte)) => key >= gte.as_slice(),
            (None, None) => true,
        };
        let upper_ok = match (&self.lt, &self.lte) {
            (Some(lt), _) => key < lt.as_slice(),
            (None, Some(lte)) => key <= lte.as_slice(),
            (None, None) => true,
        };
        lower_ok && upper_ok
    }
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when no such key exists (prefix is empty or all `0xff`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Ordered byte-keyed store.
///
/// Implementations must satisfy these invariants:
/// - `batch` commits every op or none of them.
/// - Concurrent readers see either the pre-batch or post-batch state.
/// - After a batch commits, it is published once on the change feed, and
///   feed order matches commit order.
/// - Keys compare lexicographically as raw bytes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one key. Returns [`StoreError::NotFound`] if it is absent.
    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>>;

    /// Apply all ops atomically, in order. An empty batch is a no-op and is
    /// not published.
    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Read the entries admitted by `options`, in key order (descending when
    /// `reverse`), at most `limit` of them.
    async fn range(&self, options: &IterOptions) -> StoreResult<Vec<Entry>>;

    /// Subscribe to committed batches.
    fn subscribe(&self) -> ChangeStream;

    /// Read one key, mapping NotFound to `Ok(None)`.
    async fn try_load(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.batch(vec![BatchOp::put(key, value)]).await
    }

    async fn del(&self, key: &[u8]) -> StoreResult<()> {
        self.batch(vec![BatchOp::del(key)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(b""), None);
    }

    #[test]
    fn admits_prefers_strict_bounds() {
        let opts = IterOptions::default().gt(b"b".to_vec()).gte(b"a".to_vec());
        assert!(!opts.admits(b"b"));
        assert!(opts.admits(b"c"));

        let opts = IterOptions::default().lte(b"m".to_vec());
        assert!(opts.admits(b"m"));
        assert!(!opts.admits(b"n"));
    }

    #[test]
    fn prefix_options_admit_only_prefixed_keys() {
        let opts = IterOptions::prefix(b"!events!");
        assert!(opts.admits(b"!events!abc"));
        assert!(!opts.admits(b"!eventz"));
        assert!(!opts.admits(b"!event"));
    }

    #[test]
    fn batch_op_accessors() {
        let put = BatchOp::put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(put.key(), b"k");
        assert_eq!(put.value(), Some(&b"v"[..]));
        assert_eq!(BatchOp::del(b"k".to_vec()).value(), None);
    }
}
