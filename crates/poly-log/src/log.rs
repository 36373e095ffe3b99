//! The per-identity event log.

use std::sync::Arc;

use poly_crypto::{sign_event, SigningKey};
use poly_store::{BatchOp, IterOptions, KeyValueStore, Sublevel};
use poly_types::{
    ContentType, Delete, Event, LwwElement, Pointer, Process, ProcessRanges, ProcessState,
    PublicKey, Range, SignedEvent, SystemState,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LogError, LogResult};
use crate::keys::{
    parse_process_key, pointer_key, process_key, system_key, DELETIONS, EVENTS, PROCESS_STATES,
    SYSTEM_STATES,
};
use crate::servers::servers_of;
use crate::staging::{Staged, Staging};

/// Counts from a [`EventLog::save_batch`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Pointers of the newly ingested events, in input order.
    pub pointers: Vec<Pointer>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.ingested + self.duplicates + self.rejected
    }

    pub fn merge(&mut self, other: IngestReport) {
        self.ingested += other.ingested;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.pointers.extend(other.pointers);
    }
}

/// Sublevels of one identity store plus typed loaders for their rows.
pub(crate) struct Levels {
    pub(crate) events: Sublevel,
    pub(crate) system_states: Sublevel,
    pub(crate) process_states: Sublevel,
    pub(crate) deletions: Sublevel,
}

impl Levels {
    fn new(store: &Arc<dyn KeyValueStore>) -> Self {
        Self {
            events: Sublevel::new(Arc::clone(store), EVENTS),
            system_states: Sublevel::new(Arc::clone(store), SYSTEM_STATES),
            process_states: Sublevel::new(Arc::clone(store), PROCESS_STATES),
            deletions: Sublevel::new(Arc::clone(store), DELETIONS),
        }
    }

    pub(crate) async fn load_system_state(
        &self,
        system: &PublicKey,
    ) -> LogResult<Option<SystemState>> {
        let key = system_key(system);
        match self.system_states.try_load(&key).await? {
            Some(bytes) => SystemState::decode(&bytes)
                .map(Some)
                .map_err(|e| LogError::corrupt(&key, e)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_process_state(
        &self,
        system: &PublicKey,
        process: &Process,
    ) -> LogResult<Option<ProcessState>> {
        let key = process_key(system, process);
        match self.process_states.try_load(&key).await? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LogError::corrupt(&key, e)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_deletion(&self, pointer: &Pointer) -> LogResult<Option<Delete>> {
        let key = pointer_key(pointer);
        match self.deletions.try_load(&key).await? {
            Some(bytes) => Delete::decode(&bytes)
                .map(Some)
                .map_err(|e| LogError::corrupt(&key, e)),
            None => Ok(None),
        }
    }
}

/// Append-only, multi-writer event log for the identities held in one store.
///
/// Every write path (`save`, `save_batch`, `author`) folds its events through
/// an in-memory staging overlay and commits the resulting mutations as one batch.
/// Writes are serialized by an async mutex so two concurrent folds never
/// read the same state row and overwrite each other's result.
pub struct EventLog {
    store: Arc<dyn KeyValueStore>,
    levels: Levels,
    writes: Mutex<()>,
}

impl EventLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let levels = Levels::new(&store);
        Self {
            store,
            levels,
            writes: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Sublevel of signed event bodies keyed by pointer.
    pub fn events_level(&self) -> &Sublevel {
        &self.levels.events
    }

    /// Sublevel of folded system states keyed by system.
    pub fn system_states_level(&self) -> &Sublevel {
        &self.levels.system_states
    }

    /// Verify and fold `signed` against the current store, returning the
    /// mutations that would persist it. Empty when the event is already held
    /// or tombstoned. Nothing is committed.
    pub async fn ingest(&self, signed: &SignedEvent) -> LogResult<Vec<BatchOp>> {
        let mut staging = Staging::new(&self.levels);
        match staging.stage(signed).await? {
            Staged::Ingested(_) => staging.into_ops(),
            Staged::Duplicate(_) => Ok(Vec::new()),
        }
    }

    /// Ingest and commit one event. Returns `true` when it was new.
    pub async fn save(&self, signed: &SignedEvent) -> LogResult<bool> {
        let _guard = self.writes.lock().await;
        let mut staging = Staging::new(&self.levels);
        match staging.stage(signed).await? {
            Staged::Ingested(pointer) => {
                self.store.batch(staging.into_ops()?).await?;
                debug!(%pointer, "event saved");
                Ok(true)
            }
            Staged::Duplicate(_) => Ok(false),
        }
    }

    /// Ingest many events and commit them as one batch.
    ///
    /// Malformed or badly signed records are counted as rejected and skipped;
    /// the rest of the batch still commits. Store failures abort the batch.
    pub async fn save_batch(&self, events: &[SignedEvent]) -> LogResult<IngestReport> {
        let _guard = self.writes.lock().await;
        let mut staging = Staging::new(&self.levels);
        let mut report = IngestReport::default();

        for (position, signed) in events.iter().enumerate() {
            match staging.stage(signed).await {
                Ok(Staged::Ingested(pointer)) => {
                    report.ingested += 1;
                    report.pointers.push(pointer);
                }
                Ok(Staged::Duplicate(_)) => report.duplicates += 1,
                Err(e) if e.is_rejection() => {
                    warn!(position, error = %e, "rejected event in batch");
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.ingested > 0 {
            self.store.batch(staging.into_ops()?).await?;
        }
        debug!(
            ingested = report.ingested,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "batch saved"
        );
        Ok(report)
    }

    /// Build, sign and save the next event of a local process.
    ///
    /// The clock is one past the highest clock held for the process, and the
    /// event's indices snapshot the process's latest clock per content type.
    pub async fn author(
        &self,
        key: &SigningKey,
        process: &Process,
        content_type: ContentType,
        content: Vec<u8>,
        lww_element: Option<LwwElement>,
    ) -> LogResult<SignedEvent> {
        let _guard = self.writes.lock().await;
        let system = key.system();
        let mut staging = Staging::new(&self.levels);

        let state = staging.process_state(&system, process).await?;
        let logical_clock = if state.ranges.is_empty() {
            0
        } else {
            state.logical_clock + 1
        };
        let event = Event {
            system,
            process: *process,
            logical_clock,
            content_type,
            content,
            lww_element,
            indices: state.indices.clone(),
        };

        let signed = sign_event(key, &event)?;
        staging.stage(&signed).await?;
        self.store.batch(staging.into_ops()?).await?;
        info!(pointer = %event.pointer(), %content_type, "authored event");
        Ok(signed)
    }

    pub async fn load_event(&self, pointer: &Pointer) -> LogResult<Option<SignedEvent>> {
        let key = pointer_key(pointer);
        match self.levels.events.try_load(&key).await? {
            Some(bytes) => SignedEvent::decode(&bytes)
                .map(Some)
                .map_err(|e| LogError::corrupt(&key, e)),
            None => Ok(None),
        }
    }

    /// Stored events of one process whose clocks fall in `range`, in clock
    /// order. Tombstoned and missing clocks are skipped.
    pub async fn load_range(
        &self,
        system: &PublicKey,
        process: &Process,
        range: Range,
    ) -> LogResult<Vec<SignedEvent>> {
        let low = pointer_key(&Pointer::new(*system, *process, range.low));
        let high = pointer_key(&Pointer::new(*system, *process, range.high));
        let entries = self
            .levels
            .events
            .range(&IterOptions::default().gte(low).lte(high))
            .await?;
        entries
            .iter()
            .map(|(key, value)| {
                SignedEvent::decode(value).map_err(|e| LogError::corrupt(key, e))
            })
            .collect()
    }

    /// Clocks held per process of `system`.
    pub async fn ranges_for_system(&self, system: &PublicKey) -> LogResult<Vec<ProcessRanges>> {
        let entries = self
            .levels
            .process_states
            .range(&IterOptions::prefix(&system_key(system)))
            .await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let process = parse_process_key(&key)?;
            let state: ProcessState =
                bincode::deserialize(&value).map_err(|e| LogError::corrupt(&key, e))?;
            out.push(ProcessRanges {
                process,
                ranges: state.ranges,
            });
        }
        Ok(out)
    }

    pub async fn load_system_state(&self, system: &PublicKey) -> LogResult<Option<SystemState>> {
        self.levels.load_system_state(system).await
    }

    pub async fn load_process_state(
        &self,
        system: &PublicKey,
        process: &Process,
    ) -> LogResult<Option<ProcessState>> {
        self.levels.load_process_state(system, process).await
    }

    /// The tombstone naming `pointer`, if one was ingested.
    pub async fn load_deletion(&self, pointer: &Pointer) -> LogResult<Option<Delete>> {
        self.levels.load_deletion(pointer).await
    }

    pub async fn is_deleted(&self, pointer: &Pointer) -> LogResult<bool> {
        Ok(self.load_deletion(pointer).await?.is_some())
    }

    /// Relay servers recorded for `system`.
    pub async fn servers(&self, system: &PublicKey) -> LogResult<Vec<String>> {
        match self.load_system_state(system).await? {
            Some(state) => servers_of(&state),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}
