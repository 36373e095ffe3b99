//! In-memory overlay used to fold events before a commit.
//!
//! A [`Staging`] reads through to the store but keeps every state it touched,
//! and every key it wrote, in memory. Later events of the same batch see the
//! effects of earlier ones without anything reaching the store, and the
//! whole batch leaves as one list of [`BatchOp`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use poly_crypto::verify_event;
use poly_store::BatchOp;
use poly_types::ranges;
use poly_types::{
    ContentType, Event, Index, Pointer, Process, ProcessState, PublicKey, SignedEvent,
    SystemState,
};
use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::fold::fold_event;
use crate::keys::{pointer_key, process_key, system_key};
use crate::log::Levels;

/// Result of staging one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staged {
    /// New event; its mutations are in the overlay.
    Ingested(Pointer),
    /// Already held or tombstoned; nothing changed.
    Duplicate(Pointer),
}

pub(crate) struct Staging<'a> {
    levels: &'a Levels,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    system_states: HashMap<PublicKey, SystemState>,
    process_states: HashMap<(PublicKey, Process), ProcessState>,
    dirty_systems: BTreeSet<PublicKey>,
    dirty_processes: BTreeSet<(PublicKey, Process)>,
}

impl<'a> Staging<'a> {
    pub(crate) fn new(levels: &'a Levels) -> Self {
        Self {
            levels,
            writes: BTreeMap::new(),
            system_states: HashMap::new(),
            process_states: HashMap::new(),
            dirty_systems: BTreeSet::new(),
            dirty_processes: BTreeSet::new(),
        }
    }

    pub(crate) async fn process_state(
        &mut self,
        system: &PublicKey,
        process: &Process,
    ) -> LogResult<&mut ProcessState> {
        let id = (*system, *process);
        if !self.process_states.contains_key(&id) {
            let loaded = self
                .levels
                .load_process_state(system, process)
                .await?
                .unwrap_or_default();
            self.process_states.insert(id, loaded);
        }
        Ok(self.process_states.entry(id).or_default())
    }

    async fn system_state(&mut self, system: &PublicKey) -> LogResult<&mut SystemState> {
        if !self.system_states.contains_key(system) {
            let loaded = self
                .levels
                .load_system_state(system)
                .await?
                .unwrap_or_default();
            self.system_states.insert(*system, loaded);
        }
        Ok(self.system_states.entry(*system).or_default())
    }

    async fn is_deleted(&self, pointer: &Pointer) -> LogResult<bool> {
        let key = self.levels.deletions.key(&pointer_key(pointer));
        if let Some(staged) = self.writes.get(&key) {
            return Ok(staged.is_some());
        }
        Ok(self.levels.load_deletion(pointer).await?.is_some())
    }

    /// Verify, decode and fold one signed event into the overlay.
    ///
    /// Nothing is written when the record is rejected, so a failed record
    /// leaves the overlay exactly as it was.
    pub(crate) async fn stage(&mut self, signed: &SignedEvent) -> LogResult<Staged> {
        let event = verify_event(signed)?;
        let pointer = event.pointer();
        let tombstone = match event.as_delete()? {
            Some(delete) => Some((delete.pointer(event.system), delete.encode()?)),
            None => None,
        };
        let body = signed.encode()?;

        let held = ranges::contains(
            &self.process_state(&event.system, &event.process).await?.ranges,
            event.logical_clock,
        );
        if held || self.is_deleted(&pointer).await? {
            debug!(%pointer, "duplicate event skipped");
            return Ok(Staged::Duplicate(pointer));
        }

        self.writes
            .insert(self.levels.events.key(&pointer_key(&pointer)), Some(body));
        self.record_clock(&event.system, &event.process, event.logical_clock, Some(&event))
            .await?;

        if let Some((target, record)) = tombstone {
            if target != pointer {
                let key = pointer_key(&target);
                self.writes
                    .insert(self.levels.deletions.key(&key), Some(record));
                self.writes.insert(self.levels.events.key(&key), None);
                self.record_clock(&target.system, &target.process, target.logical_clock, None)
                    .await?;
                debug!(%target, by = %pointer, "event tombstoned");
            }
        }

        let state = self.system_state(&event.system).await?;
        if fold_event(state, &event).changed() {
            self.dirty_systems.insert(event.system);
        }

        Ok(Staged::Ingested(pointer))
    }

    /// Mark `clock` as held for the process and, for a stored event, advance
    /// the per-content-type index.
    async fn record_clock(
        &mut self,
        system: &PublicKey,
        process: &Process,
        clock: u64,
        event: Option<&Event>,
    ) -> LogResult<()> {
        let state = self.process_state(system, process).await?;
        let mut changed = ranges::insert(&mut state.ranges, clock);
        if clock > state.logical_clock {
            state.logical_clock = clock;
            changed = true;
        }
        if let Some(event) = event {
            changed |= advance_index(&mut state.indices, event.content_type, clock);
        }
        if changed {
            self.dirty_processes.insert((*system, *process));
        }
        Ok(())
    }

    /// Drain the overlay into store mutations.
    pub(crate) fn into_ops(mut self) -> LogResult<Vec<BatchOp>> {
        for system in &self.dirty_systems {
            if let Some(state) = self.system_states.get(system) {
                self.writes.insert(
                    self.levels.system_states.key(&system_key(system)),
                    Some(state.encode()?),
                );
            }
        }
        for id in &self.dirty_processes {
            if let Some(state) = self.process_states.get(id) {
                self.writes.insert(
                    self.levels.process_states.key(&process_key(&id.0, &id.1)),
                    Some(encode_process_state(state)?),
                );
            }
        }

        Ok(self
            .writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOp::put(key, value),
                None => BatchOp::del(key),
            })
            .collect())
    }
}

fn advance_index(indices: &mut Vec<Index>, content_type: ContentType, clock: u64) -> bool {
    match indices.iter_mut().find(|i| i.index_type == content_type) {
        Some(index) if index.logical_clock >= clock => false,
        Some(index) => {
            index.logical_clock = clock;
            true
        }
        None => {
            indices.push(Index {
                index_type: content_type,
                logical_clock: clock,
            });
            true
        }
    }
}

pub(crate) fn encode_process_state(state: &ProcessState) -> LogResult<Vec<u8>> {
    bincode::serialize(state).map_err(|e| LogError::Encode(e.to_string()))
}
