use super::context::AddressInfo;
use super::stats::*;
use super::table::{BoundedTable, Insert};

/// A descriptor scoped to its owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub pid: u32,
    pub fd: u32,
}

impl ConnectionKey {
    pub const fn new(pid: u32, fd: u32) -> Self {
        Self { pid, fd }
    }
}

/// The set of descriptors returned by an observed, successful `accept` and
/// not yet seen to be closed.
///
/// Writes and closes on descriptors that are not in the registry belong to
/// files, pipes, or sockets created some other way and are ignored. Entries
/// for connections that end without a visible `close` linger until the
/// descriptor number is reused or the registry fills up.
pub struct ConnectionRegistry {
    table: BoundedTable<ConnectionKey, AddressInfo>,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: BoundedTable::new(capacity),
        }
    }

    /// Starts tracking `key`. A reused descriptor number replaces the prior
    /// entry. Returns `false` if the registry is full and the entry was not
    /// stored.
    pub fn on_accept_success(&self, key: ConnectionKey, addr: AddressInfo) -> bool {
        match self.table.insert(key, addr) {
            Insert::Added | Insert::Replaced => true,
            Insert::Dropped => {
                REGISTRY_DROPPED.increment();
                false
            }
        }
    }

    pub fn is_tracked(&self, key: ConnectionKey) -> bool {
        self.table.contains_key(&key)
    }

    /// Stops tracking `key`. Returns whether it was tracked.
    pub fn on_close(&self, key: ConnectionKey) -> bool {
        self.table.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}
