//! Inclusive sequence-number intervals.
//!
//! A `Vec<Range>` handled by the functions in this module is always kept
//! normalized: sorted by `low`, non-overlapping, and with adjacent ranges
//! coalesced. Every function here preserves that invariant.

use serde::{Deserialize, Serialize};

use crate::event::Index;
use crate::identity::Process;

/// Inclusive `[low, high]` interval of logical clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub low: u64,
    pub high: u64,
}

impl Range {
    pub fn new(low: u64, high: u64) -> Self {
        debug_assert!(low <= high, "range low {low} above high {high}");
        Self { low, high }
    }

    pub fn single(item: u64) -> Self {
        Self { low: item, high: item }
    }

    pub fn contains(&self, item: u64) -> bool {
        self.low <= item && item <= self.high
    }

    /// Number of clocks in the range.
    pub fn len(&self) -> u64 {
        (self.high - self.low).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate the clocks in ascending order.
    pub fn iter(&self) -> std::ops::RangeInclusive<u64> {
        self.low..=self.high
    }
}

/// Ranges of clocks held for one process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRanges {
    pub process: Process,
    pub ranges: Vec<Range>,
}

/// Per-(system, process) bookkeeping maintained by the event log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Highest logical clock seen for this process.
    pub logical_clock: u64,
    /// Clocks held locally.
    pub ranges: Vec<Range>,
    /// Latest clock per indexed content type.
    pub indices: Vec<Index>,
}

/// Insert `item` into `ranges`, merging with neighbors. Returns `false` if it
/// was already present.
pub fn insert(ranges: &mut Vec<Range>, item: u64) -> bool {
    let pos = ranges.partition_point(|r| r.high < item);

    if let Some(r) = ranges.get(pos) {
        if r.contains(item) {
            return false;
        }
    }

    let joins_prev = pos > 0 && ranges[pos - 1].high.checked_add(1) == Some(item);
    let joins_next = ranges
        .get(pos)
        .is_some_and(|r| item.checked_add(1) == Some(r.low));

    match (joins_prev, joins_next) {
        (true, true) => {
            ranges[pos - 1].high = ranges[pos].high;
            ranges.remove(pos);
        }
        (true, false) => ranges[pos - 1].high = item,
        (false, true) => ranges[pos].low = item,
        (false, false) => ranges.insert(pos, Range::single(item)),
    }
    true
}

pub fn contains(ranges: &[Range], item: u64) -> bool {
    let pos = ranges.partition_point(|r| r.high < item);
    ranges.get(pos).is_some_and(|r| r.contains(item))
}

/// The parts of `a` not covered by `b`.
pub fn subtract(a: &[Range], b: &[Range]) -> Vec<Range> {
    let mut out = Vec::new();

    for r in a {
        let mut low = Some(r.low);
        for s in b {
            let Some(current) = low else { break };
            if s.high < current || s.low > r.high {
                continue;
            }
            if s.low > current {
                out.push(Range::new(current, s.low - 1));
            }
            low = if s.high >= r.high { None } else { Some(s.high + 1) };
        }
        if let Some(current) = low {
            out.push(Range::new(current, r.high));
        }
    }

    out
}

/// Sort and coalesce ranges from an untrusted source. Returns `None` when
/// any range has `low` above `high`.
pub fn normalize(mut ranges: Vec<Range>) -> Option<Vec<Range>> {
    if ranges.iter().any(|r| r.low > r.high) {
        return None;
    }
    ranges.sort_unstable();
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if r.low <= last.high.saturating_add(1) => {
                last.high = last.high.max(r.high);
            }
            _ => out.push(r),
        }
    }
    Some(out)
}

/// The first `limit` clocks of `ranges`, in ascending order.
pub fn take(ranges: &[Range], limit: u64) -> Vec<Range> {
    let mut out = Vec::new();
    let mut remaining = limit;

    for r in ranges {
        if remaining == 0 {
            break;
        }
        if r.len() <= remaining {
            out.push(*r);
            remaining -= r.len();
        } else {
            out.push(Range::new(r.low, r.low + remaining - 1));
            remaining = 0;
        }
    }

    out
}

pub fn total_items(ranges: &[Range]) -> u64 {
    ranges.iter().fold(0u64, |acc, r| acc.saturating_add(r.len()))
}

/// `true` when every clock in `[low, high]` is present.
pub fn covers(ranges: &[Range], low: u64, high: u64) -> bool {
    subtract(&[Range::new(low, high)], ranges).is_empty()
}
