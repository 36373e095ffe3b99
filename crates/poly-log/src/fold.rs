//! The CRDT fold from events into [`SystemState`].
//!
//! Two independent rules apply to every event:
//!
//! 1. **LWW field.** When the event carries an `lww_element`, the item for its
//!    content type is inserted if absent, or replaced only when the incoming
//!    timestamp is strictly greater than the stored one. Equal timestamps keep
//!    the stored value.
//! 2. **Process set.** The event's process is appended to `processes` unless
//!    an equal process is already present.
//!
//! Both rules are monotone, so folding is idempotent, and for distinct
//! timestamps per content type it is order-independent.

use poly_types::{CrdtItem, Event, SystemState};

/// What folding one event changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    pub lww_updated: bool,
    pub process_added: bool,
}

impl FoldOutcome {
    /// Whether the state must be persisted again.
    pub fn changed(&self) -> bool {
        self.lww_updated || self.process_added
    }
}

/// Fold `event` into `state` in place.
pub fn fold_event(state: &mut SystemState, event: &Event) -> FoldOutcome {
    let mut outcome = FoldOutcome::default();

    if let Some(lww) = &event.lww_element {
        match state
            .crdt_items
            .binary_search_by_key(&event.content_type, |item| item.content_type)
        {
            Ok(pos) => {
                let item = &mut state.crdt_items[pos];
                if lww.unix_milliseconds > item.unix_milliseconds {
                    item.value = lww.value.clone();
                    item.unix_milliseconds = lww.unix_milliseconds;
                    outcome.lww_updated = true;
                }
            }
            Err(pos) => {
                state.crdt_items.insert(
                    pos,
                    CrdtItem {
                        content_type: event.content_type,
                        value: lww.value.clone(),
                        unix_milliseconds: lww.unix_milliseconds,
                    },
                );
                outcome.lww_updated = true;
            }
        }
    }

    if !state.has_process(&event.process) {
        state.processes.push(event.process);
        outcome.process_added = true;
    }

    outcome
}

/// Fold a sequence of events into a fresh state.
pub fn fold_all<'a>(events: impl IntoIterator<Item = &'a Event>) -> SystemState {
    let mut state = SystemState::default();
    for event in events {
        fold_event(&mut state, event);
    }
    state
}
