use poly_types::{ranges, ProcessRanges, Range};

use crate::types::SyncScope;

/// Range negotiation: which clocks to pull from, or push to, a server.
pub struct NegotiationEngine;

impl NegotiationEngine {
    /// Clocks `remote` holds that `local` lacks, clipped to `scope` and
    /// capped at `limit` clocks in total.
    pub fn compute_wants(
        local: &[ProcessRanges],
        remote: &[ProcessRanges],
        scope: &SyncScope,
        limit: u64,
    ) -> Vec<ProcessRanges> {
        let mut remaining = limit;
        let mut out = Vec::new();
        for theirs in remote {
            if remaining == 0 {
                break;
            }
            let offered = scope.clip(&theirs.process, &theirs.ranges);
            let missing = ranges::subtract(&offered, ranges_of(local, &theirs));
            let taken = ranges::take(&missing, remaining);
            if taken.is_empty() {
                continue;
            }
            remaining -= ranges::total_items(&taken);
            out.push(ProcessRanges {
                process: theirs.process,
                ranges: taken,
            });
        }
        out
    }

    /// Clocks `local` holds that `remote` lacks, capped at `limit`.
    pub fn compute_haves(
        local: &[ProcessRanges],
        remote: &[ProcessRanges],
        limit: u64,
    ) -> Vec<ProcessRanges> {
        Self::compute_wants(remote, local, &SyncScope::All, limit)
    }
}

fn ranges_of<'a>(list: &'a [ProcessRanges], like: &ProcessRanges) -> &'a [Range] {
    list.iter()
        .find(|p| p.process == like.process)
        .map_or(&[], |p| p.ranges.as_slice())
}
