use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Lifecycle of one live query.
///
/// `Pending` until a callback delivers data, `Resolved` afterwards, `Stale`
/// while a committed batch is being re-evaluated. `Cancelled` is terminal
/// and reachable from every other state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Resolved,
    Stale,
    Cancelled,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Stale => "stale",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Shared state cell enforcing the transitions above.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<SubscriptionState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(SubscriptionState::Pending))
    }

    pub(crate) fn get(&self) -> SubscriptionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` unless already cancelled. Returns `false` when the
    /// subscription is cancelled.
    fn transition(&self, next: SubscriptionState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SubscriptionState::Cancelled {
            return false;
        }
        *state = next;
        true
    }

    pub(crate) fn resolve(&self) -> bool {
        self.transition(SubscriptionState::Resolved)
    }

    /// Only a resolved subscription can go stale.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SubscriptionState::Cancelled => false,
            SubscriptionState::Resolved => {
                *state = SubscriptionState::Stale;
                true
            }
            _ => true,
        }
    }

    pub(crate) fn cancel(&self) {
        self.transition(SubscriptionState::Cancelled);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.get() == SubscriptionState::Cancelled
    }
}
