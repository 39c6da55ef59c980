use super::classifier::StatusClass;
use super::stats::*;
use super::table::BoundedTable;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The key for the response counter, an owning process and status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub pid: u32,
    pub status: StatusClass,
}

impl RequestKey {
    pub const fn new(pid: u32, status: StatusClass) -> Self {
        Self { pid, status }
    }
}

#[derive(Default)]
struct ProcessCounters {
    started: AtomicU64,
    closed: AtomicU64,
}

/// Per-process totals as of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTotals {
    pub connections_started: u64,
    pub connections_closed: u64,
    pub responses_observed: u64,
}

/// A point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorSnapshot {
    pub processes: BTreeMap<u32, ProcessTotals>,
    pub responses: BTreeMap<RequestKey, u64>,
}

#[cfg(test)]
impl AggregatorSnapshot {
    pub fn process(&self, pid: u32) -> ProcessTotals {
        self.processes.get(&pid).copied().unwrap_or_default()
    }

    pub fn responses(&self, pid: u32, status: StatusClass) -> u64 {
        self.responses
            .get(&RequestKey::new(pid, status))
            .copied()
            .unwrap_or(0)
    }
}

/// Monotonic connection and response counters keyed by owning process.
///
/// Increments are single atomic adds that wrap at `u64::MAX`. There is no
/// decrement and no reset, counters live as long as the aggregator. Each key
/// table is bounded, increments for a new key are dropped once it is full.
pub struct Aggregator {
    processes: BoundedTable<u32, ProcessCounters>,
    responses: BoundedTable<RequestKey, AtomicU64>,
}

impl Aggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            processes: BoundedTable::new(capacity),
            responses: BoundedTable::new(capacity),
        }
    }

    pub fn inc_started(&self, pid: u32) {
        self.process(pid, |c| c.started.fetch_add(1, Ordering::Relaxed));
    }

    pub fn inc_closed(&self, pid: u32) {
        self.process(pid, |c| c.closed.fetch_add(1, Ordering::Relaxed));
    }

    pub fn inc_response(&self, pid: u32, status: StatusClass) {
        let recorded = self
            .responses
            .upsert_with(RequestKey::new(pid, status), AtomicU64::default, |c| {
                c.fetch_add(1, Ordering::Relaxed)
            });

        if recorded.is_none() {
            AGGREGATOR_DROPPED.increment();
        }
    }

    fn process(&self, pid: u32, f: impl FnOnce(&ProcessCounters) -> u64) {
        if self
            .processes
            .upsert_with(pid, ProcessCounters::default, f)
            .is_none()
        {
            AGGREGATOR_DROPPED.increment();
        }
    }

    /// Reads every counter. Each value reflects whole increments only,
    /// values across counters are not read at the same instant.
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let mut snapshot = AggregatorSnapshot::default();

        self.processes.for_each(|pid, counters| {
            let totals = snapshot.processes.entry(*pid).or_default();
            totals.connections_started = counters.started.load(Ordering::Relaxed);
            totals.connections_closed = counters.closed.load(Ordering::Relaxed);
        });

        self.responses.for_each(|key, count| {
            let count = count.load(Ordering::Relaxed);
            snapshot.responses.insert(*key, count);

            let totals = snapshot.processes.entry(key.pid).or_default();
            totals.responses_observed = totals.responses_observed.wrapping_add(count);
        });

        snapshot
    }
}
