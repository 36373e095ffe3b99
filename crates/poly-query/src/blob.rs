use std::sync::Arc;

use async_trait::async_trait;
use poly_log::EventLog;
use poly_types::{
    ranges, CancelContext, CancelToken, ContentType, Pointer, Process, PublicKey, Range, SignedEvent,
};
use tracing::{debug, warn};

use crate::dependency::DependencyContext;
use crate::error::{QueryError, QueryResult};
use crate::manager::{QueryHandle, Shared};
use crate::state::StateCell;

/// Outcome of one attempt to build a value from the local log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    Ready(T),
    /// Pointers that are not stored yet.
    Missing(Vec<Pointer>),
}

/// A value derived from stored events that may have to wait for some of
/// them to arrive.
#[async_trait]
pub trait Resolve: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn attempt(&self, log: &EventLog) -> QueryResult<Attempt<Self::Output>>;
}

/// Most sections a single blob query assembles or waits on.
pub const MAX_BLOB_SECTIONS: u64 = 1 << 16;

/// Concatenated `BLOB_SECTION` contents of one process, in range order.
#[derive(Clone, Debug)]
pub struct BlobTarget {
    pub system: PublicKey,
    pub process: Process,
    pub ranges: Vec<Range>,
}

#[async_trait]
impl Resolve for BlobTarget {
    type Output = Vec<u8>;

    async fn attempt(&self, log: &EventLog) -> QueryResult<Attempt<Vec<u8>>> {
        if let Some(bad) = self.ranges.iter().find(|r| r.low > r.high) {
            return Err(QueryError::Decode(format!(
                "blob range {}..={} is inverted",
                bad.low, bad.high
            )));
        }
        let sections = ranges::total_items(&self.ranges);
        if sections > MAX_BLOB_SECTIONS {
            return Err(QueryError::BlobTooLarge {
                sections,
                max: MAX_BLOB_SECTIONS,
            });
        }
        let mut blob = Vec::new();
        let mut missing = Vec::new();
        for range in &self.ranges {
            for clock in range.iter() {
                let pointer = Pointer::new(self.system, self.process, clock);
                let Some(signed) = log.load_event(&pointer).await? else {
                    missing.push(pointer);
                    continue;
                };
                if !missing.is_empty() {
                    continue;
                }
                let event = signed
                    .decode_event()
                    .map_err(|e| QueryError::Decode(e.to_string()))?;
                if event.content_type != ContentType::BLOB_SECTION {
                    return Err(QueryError::Decode(format!(
                        "{pointer} is {} not a blob section",
                        event.content_type
                    )));
                }
                blob.extend_from_slice(&event.content);
            }
        }
        if missing.is_empty() {
            Ok(Attempt::Ready(blob))
        } else {
            Ok(Attempt::Missing(missing))
        }
    }
}

/// One event by pointer.
#[derive(Clone, Debug)]
pub struct EventTarget(pub Pointer);

#[async_trait]
impl Resolve for EventTarget {
    type Output = SignedEvent;

    async fn attempt(&self, log: &EventLog) -> QueryResult<Attempt<SignedEvent>> {
        if let Some(signed) = log.load_event(&self.0).await? {
            return Ok(Attempt::Ready(signed));
        }
        if log.is_deleted(&self.0).await? {
            return Err(QueryError::Deleted(self.0));
        }
        Ok(Attempt::Missing(vec![self.0]))
    }
}

/// Queries whose value appears once, after every event it needs is stored.
#[derive(Clone)]
pub struct QueryBlob {
    shared: Arc<Shared>,
}

impl QueryBlob {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Reassemble a blob from the chunk events named by `ranges`.
    ///
    /// `callback` runs once, when every chunk is stored. Missing chunks are
    /// waited on through a [`DependencyContext`] and the assembly retried as
    /// they arrive.
    pub fn query<F>(
        &self,
        system: PublicKey,
        process: Process,
        ranges: Vec<Range>,
        cancel: &CancelToken,
        callback: F,
    ) -> QueryHandle
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        let target = BlobTarget {
            system,
            process,
            ranges,
        };
        self.resolve(target, cancel, callback)
    }

    /// Run `callback` with the event at `pointer` once it is stored.
    pub fn query_event<F>(&self, pointer: Pointer, cancel: &CancelToken, callback: F) -> QueryHandle
    where
        F: FnOnce(SignedEvent) + Send + 'static,
    {
        self.resolve(EventTarget(pointer), cancel, callback)
    }

    /// Drive any [`Resolve`] target to completion in a background task.
    pub fn resolve<R, F>(&self, target: R, cancel: &CancelToken, callback: F) -> QueryHandle
    where
        R: Resolve,
        F: FnOnce(R::Output) + Send + 'static,
    {
        let own = CancelContext::new();
        let state = Arc::new(StateCell::new());
        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            target,
            cancel.clone(),
            own.token(),
            Arc::clone(&state),
            callback,
        ));
        QueryHandle::task(task, state, own)
    }
}

impl std::fmt::Debug for QueryBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBlob").finish_non_exhaustive()
    }
}

async fn drive<R, F>(
    shared: Arc<Shared>,
    target: R,
    owner: CancelToken,
    handle: CancelToken,
    state: Arc<StateCell>,
    callback: F,
) where
    R: Resolve,
    F: FnOnce(R::Output) + Send + 'static,
{
    let cancelled = || owner.is_cancelled() || handle.is_cancelled();
    loop {
        if cancelled() {
            state.cancel();
            return;
        }
        let missing = match target.attempt(&shared.log).await {
            Ok(Attempt::Ready(value)) => {
                if cancelled() || !state.resolve() {
                    state.cancel();
                    return;
                }
                callback(value);
                return;
            }
            Ok(Attempt::Missing(missing)) => missing,
            Err(e) => {
                warn!(error = %e, "query gave up");
                state.cancel();
                return;
            }
        };

        let mut deps = DependencyContext::new(Arc::clone(&shared.waiters));
        for pointer in &missing {
            deps.add_dependency(*pointer);
        }
        // A pointer stored between the attempt and the registration would
        // never fire its waiter; look again before sleeping.
        if arrived_any(&shared.log, &missing).await {
            deps.cleanup();
            continue;
        }
        debug!(pending = missing.len(), "query waiting on dependencies");
        tokio::select! {
            _ = deps.wait() => {}
            _ = owner.cancelled() => {}
            _ = handle.cancelled() => {}
        }
        deps.cleanup();
    }
}

async fn arrived_any(log: &EventLog, pointers: &[Pointer]) -> bool {
    for pointer in pointers {
        if matches!(log.load_event(pointer).await, Ok(Some(_))) {
            return true;
        }
    }
    false
}
