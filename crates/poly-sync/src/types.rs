use std::collections::BTreeMap;

use poly_types::{Process, Range, SignedEvent};
use serde::{Deserialize, Serialize};

/// Which part of an identity's log a backfill covers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncScope {
    #[default]
    All,
    /// One process, optionally limited to a clock range.
    Process {
        process: Process,
        range: Option<Range>,
    },
}

impl SyncScope {
    pub fn process(process: Process) -> Self {
        Self::Process {
            process,
            range: None,
        }
    }

    /// Clip `ranges` of `process` to this scope.
    pub fn clip(&self, process: &Process, ranges: &[Range]) -> Vec<Range> {
        match self {
            Self::All => ranges.to_vec(),
            Self::Process { process: p, .. } if p != process => Vec::new(),
            Self::Process { range: None, .. } => ranges.to_vec(),
            Self::Process {
                range: Some(bound), ..
            } => ranges
                .iter()
                .filter(|r| r.high >= bound.low && r.low <= bound.high)
                .map(|r| Range::new(r.low.max(bound.low), r.high.min(bound.high)))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerStatus {
    Synced { ingested: usize, rounds: u32 },
    Failed { error: String },
}

/// Result of talking to one server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOutcome {
    pub url: String,
    pub status: ServerStatus,
}

impl ServerOutcome {
    pub fn failed(url: &str, error: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            status: ServerStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ServerStatus::Failed { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub servers: Vec<ServerOutcome>,
    /// New events stored across all servers.
    pub ingested: usize,
    /// Whether the local log covers every server head afterwards.
    pub complete: bool,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &ServerOutcome> {
        self.servers.iter().filter(|s| s.is_failed())
    }
}

/// Highest clock per process reported across servers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadReport {
    pub heads: BTreeMap<Process, u64>,
    pub servers: Vec<ServerOutcome>,
}

impl HeadReport {
    /// `true` when no server answered.
    pub fn all_failed(&self) -> bool {
        !self.servers.is_empty() && self.servers.iter().all(ServerOutcome::is_failed)
    }
}

/// One page of a cross-server feed.
///
/// `events` are verified, stored, deduplicated and free of tombstoned
/// entries. `cursors` holds the next cursor per server that returned one.
#[derive(Clone, Debug, Default)]
pub struct FeedPage {
    pub events: Vec<SignedEvent>,
    pub servers: Vec<ServerOutcome>,
    pub cursors: BTreeMap<String, u64>,
}
