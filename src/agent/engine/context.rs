use super::stats::*;
use super::table::{BoundedTable, Insert};

use serde::{Deserialize, Serialize};

use std::fmt;

/// Identifies the calling thread at the time of a probe invocation. The
/// upper 32 bits hold the process id (tgid) and the lower 32 bits hold the
/// thread id, the same layout as `bpf_get_current_pid_tgid()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(u64);

impl ContextKey {
    #[cfg(test)]
    pub const fn new(pid: u32, tid: u32) -> Self {
        Self(((pid as u64) << 32) | tid as u64)
    }

    #[cfg(any(test, all(feature = "bpf", target_os = "linux")))]
    pub const fn from_raw(pid_tgid: u64) -> Self {
        Self(pid_tgid)
    }

    #[cfg(test)]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// The owning process.
    pub const fn pid(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn tid(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid(), self.tid())
    }
}

/// The caller-supplied `sockaddr` and `addrlen` pointers passed to `accept`.
///
/// These are addresses in the monitored process and are never dereferenced
/// here. They are carried so that the peer address could be resolved later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub addr: u64,
    pub addrlen: u64,
}

/// Bridges the entry and exit of an in-flight `accept` on a single thread.
///
/// A thread can only have one accept in flight, so a new entry overwrites any
/// prior one for the same key. Entries are removed unconditionally on exit.
/// Entries whose exit is never observed stay until the cache fills, after
/// which new entries are dropped and the matching exits become misses.
pub struct ContextCache {
    table: BoundedTable<ContextKey, AddressInfo>,
}

impl ContextCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: BoundedTable::new(capacity),
        }
    }

    pub fn on_accept_entry(&self, ctx: ContextKey, addr: AddressInfo) {
        if self.table.insert(ctx, addr) == Insert::Dropped {
            CONTEXT_DROPPED.increment();
        }
    }

    /// Claims the stashed address info for `ctx`. A miss is routine: the
    /// entry may predate attachment or may have been dropped.
    pub fn on_accept_exit(&self, ctx: ContextKey) -> Option<AddressInfo> {
        let addr = self.table.remove(&ctx);

        if addr.is_none() {
            CONTEXT_MISS.increment();
        }

        addr
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}
