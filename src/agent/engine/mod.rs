//! The syscall correlation engine.
//!
//! Turns a stream of `accept`, `write`, and `close` observations into
//! connection and HTTP response counters for each owning process:
//!
//! * accept entry stashes the address info for the calling thread
//! * accept exit claims it and, on success, registers the returned descriptor
//! * write entry on a registered descriptor is classified as a response
//! * close entry evicts the descriptor
//!
//! Every entry point is total. Events may arrive out of order, without their
//! predecessor, or for descriptors that were never accepted, and none of this
//! is an error. Nothing here blocks or allocates beyond the fixed table
//! capacities, and missed correlations only show up as undercounting.

mod aggregator;
mod classifier;
mod context;
mod registry;
mod stats;
mod table;

pub use aggregator::{Aggregator, AggregatorSnapshot};
#[cfg(any(test, all(feature = "bpf", target_os = "linux")))]
pub use classifier::PREFIX_LEN;
pub use context::{AddressInfo, ContextKey};
pub use stats::DECODE_ERROR;

#[cfg(test)]
pub use classifier::StatusClass;

use classifier::classify;
use context::ContextCache;
use registry::{ConnectionKey, ConnectionRegistry};

use stats::*;

use crate::agent::Config;

use tracing::trace;

use std::sync::Arc;

/// Restricts observation to a single process. With no target every process
/// is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessFilter {
    target: Option<u32>,
}

impl ProcessFilter {
    pub const fn new(target: Option<u32>) -> Self {
        Self { target }
    }

    pub const fn target(&self) -> Option<u32> {
        self.target
    }

    #[inline]
    pub fn admits(&self, pid: u32) -> bool {
        match self.target {
            Some(target) => target == pid,
            None => true,
        }
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub target: Option<u32>,
    pub context_capacity: usize,
    pub registry_capacity: usize,
    pub aggregator_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target: None,
            context_capacity: 10240,
            registry_capacity: 10240,
            aggregator_capacity: 4096,
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        let engine = config.engine();

        Self {
            target: config.target().pid(),
            context_capacity: engine.context_capacity(),
            registry_capacity: engine.registry_capacity(),
            aggregator_capacity: engine.aggregator_capacity(),
        }
    }
}

pub struct Engine {
    filter: ProcessFilter,
    contexts: ContextCache,
    registry: ConnectionRegistry,
    aggregator: Arc<Aggregator>,
}

impl Engine {
    #[cfg(test)]
    pub fn new(settings: Settings) -> Self {
        Self::with_aggregator(
            settings,
            Arc::new(Aggregator::new(settings.aggregator_capacity)),
        )
    }

    /// Builds an engine that reports into an existing aggregator.
    pub fn with_aggregator(settings: Settings, aggregator: Arc<Aggregator>) -> Self {
        Self {
            filter: ProcessFilter::new(settings.target),
            contexts: ContextCache::new(settings.context_capacity),
            registry: ConnectionRegistry::new(settings.registry_capacity),
            aggregator,
        }
    }

    pub fn filter(&self) -> ProcessFilter {
        self.filter
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        self.aggregator.snapshot()
    }

    #[cfg(test)]
    pub fn is_tracked(&self, pid: u32, fd: u32) -> bool {
        self.registry.is_tracked(ConnectionKey::new(pid, fd))
    }

    /// An `accept` or `accept4` call was entered.
    pub fn on_accept_entry(&self, ctx: ContextKey, addr: AddressInfo) {
        EVENTS_ACCEPT_ENTRY.increment();

        if !self.admit(ctx) {
            return;
        }

        self.contexts.on_accept_entry(ctx, addr);
    }

    /// An `accept` or `accept4` call returned `ret`, negative on failure.
    ///
    /// A descriptor is only registered when both the entry and a successful
    /// exit were observed for the same thread.
    pub fn on_accept_exit(&self, ctx: ContextKey, ret: i64) {
        EVENTS_ACCEPT_EXIT.increment();

        if !self.admit(ctx) {
            return;
        }

        // always claimed, so no entry outlives its accept call
        let Some(addr) = self.contexts.on_accept_exit(ctx) else {
            trace!("accept exit without entry: {ctx}");
            return;
        };

        let Ok(fd) = u32::try_from(ret) else {
            ACCEPT_FAILED.increment();
            return;
        };

        let pid = ctx.pid();

        self.registry
            .on_accept_success(ConnectionKey::new(pid, fd), addr);
        self.aggregator.inc_started(pid);
    }

    /// A `write` of `count` bytes was entered on `fd`. `payload` holds the
    /// leading bytes of the buffer, possibly fewer than `count`.
    pub fn on_write_entry(&self, ctx: ContextKey, fd: u32, payload: &[u8], count: usize) {
        EVENTS_WRITE_ENTRY.increment();

        if !self.admit(ctx) {
            return;
        }

        let pid = ctx.pid();

        if !self.registry.is_tracked(ConnectionKey::new(pid, fd)) {
            return;
        }

        match classify(payload, count) {
            Some(status) if status.is_indeterminate() => {
                INDETERMINATE.increment();
            }
            Some(status) => {
                trace!("response on {pid}:{fd} status class {status}");
                self.aggregator.inc_response(pid, status);
            }
            None => {}
        }
    }

    /// A `close` was entered on `fd`.
    pub fn on_close_entry(&self, ctx: ContextKey, fd: u32) {
        EVENTS_CLOSE_ENTRY.increment();

        if !self.admit(ctx) {
            return;
        }

        let pid = ctx.pid();

        if self.registry.on_close(ConnectionKey::new(pid, fd)) {
            self.aggregator.inc_closed(pid);
        }
    }

    /// Publishes table occupancy to the self-monitoring gauges.
    pub fn update_gauges(&self) {
        CONTEXT_SIZE.set(self.contexts.len() as i64);
        REGISTRY_SIZE.set(self.registry.len() as i64);
    }

    pub fn capacities(&self) -> (usize, usize) {
        (self.contexts.capacity(), self.registry.capacity())
    }

    #[inline]
    fn admit(&self, ctx: ContextKey) -> bool {
        if self.filter.admits(ctx.pid()) {
            true
        } else {
            FILTERED.increment();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::aggregator::ProcessTotals;

    const PID: u32 = 4321;

    const A: AddressInfo = AddressInfo {
        addr: 0xa000,
        addrlen: 0xa080,
    };

    const B: AddressInfo = AddressInfo {
        addr: 0xb000,
        addrlen: 0xb080,
    };

    const OK: StatusClass = StatusClass::new(b'2');

    fn engine() -> Engine {
        Engine::new(Settings::default())
    }

    fn ctx(tid: u32) -> ContextKey {
        ContextKey::new(PID, tid)
    }

    fn write(engine: &Engine, ctx: ContextKey, fd: u32, payload: &str) {
        engine.on_write_entry(ctx, fd, payload.as_bytes(), payload.len());
    }

    #[test]
    fn full_connection_lifecycle() {
        let engine = engine();

        engine.on_accept_entry(ctx(5), A);
        assert!(!engine.is_tracked(PID, 7));

        engine.on_accept_exit(ctx(5), 7);
        assert!(engine.is_tracked(PID, 7));

        write(&engine, ctx(5), 7, "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n");
        assert!(engine.is_tracked(PID, 7));

        engine.on_close_entry(ctx(5), 7);
        assert!(!engine.is_tracked(PID, 7));

        let snapshot = engine.snapshot();
        assert_eq!(
            snapshot.process(PID),
            ProcessTotals {
                connections_started: 1,
                connections_closed: 1,
                responses_observed: 1,
            }
        );
        assert_eq!(snapshot.responses(PID, OK), 1);
    }

    #[test]
    fn failed_accept_registers_nothing() {
        let engine = engine();

        engine.on_accept_entry(ctx(9), B);
        engine.on_accept_exit(ctx(9), -1);

        assert_eq!(engine.snapshot().process(PID).connections_started, 0);
        assert_eq!(engine.registry.len(), 0);

        // the context was still claimed
        assert_eq!(engine.contexts.len(), 0);
    }

    #[test]
    fn unmatched_exit_registers_nothing() {
        let engine = engine();

        engine.on_accept_exit(ctx(42), 3);

        assert!(!engine.is_tracked(PID, 3));
        assert_eq!(engine.snapshot().process(PID).connections_started, 0);
    }

    #[test]
    fn unmatched_exit_leaves_existing_entry() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 3);

        engine.on_accept_exit(ctx(42), 3);

        assert!(engine.is_tracked(PID, 3));
        assert_eq!(engine.snapshot().process(PID).connections_started, 1);
    }

    #[test]
    fn request_write_is_not_a_response() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);
        write(&engine, ctx(1), 7, "GET / HTTP/1.1");

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.process(PID).responses_observed, 0);
        assert!(snapshot.responses.is_empty());
    }

    #[test]
    fn body_writes_fall_through() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);
        write(&engine, ctx(1), 7, "HTTP/1.1 404 Not Found\r\n\r\n");
        write(&engine, ctx(1), 7, "<html>not found</html>");
        write(&engine, ctx(1), 7, "<html>still not found</html>");

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.process(PID).responses_observed, 1);
        assert_eq!(snapshot.responses(PID, StatusClass::new(b'4')), 1);
    }

    #[test]
    fn untracked_write_is_ignored() {
        let engine = engine();

        write(&engine, ctx(1), 1, "HTTP/1.1 200 OK\r\n");
        write(&engine, ctx(1), 12, "HTTP/1.1 500 Internal Server Error\r\n");

        assert!(engine.snapshot().responses.is_empty());
    }

    #[test]
    fn short_response_is_indeterminate() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);
        write(&engine, ctx(1), 7, "HTTP/1.1");

        assert_eq!(engine.snapshot().process(PID).responses_observed, 0);
    }

    #[test]
    fn close_of_untracked_is_noop() {
        let engine = engine();

        engine.on_close_entry(ctx(1), 7);

        assert_eq!(engine.snapshot().process(PID).connections_closed, 0);
    }

    #[test]
    fn events_after_close_are_ignored() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);
        engine.on_close_entry(ctx(1), 7);
        write(&engine, ctx(1), 7, "HTTP/1.1 200 OK\r\n");
        engine.on_close_entry(ctx(1), 7);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.process(PID).connections_closed, 1);
        assert_eq!(snapshot.process(PID).responses_observed, 0);
    }

    #[test]
    fn writes_from_another_thread_count() {
        let engine = engine();

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);
        write(&engine, ctx(2), 7, "HTTP/1.1 200 OK\r\n");
        engine.on_close_entry(ctx(3), 7);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.responses(PID, OK), 1);
        assert_eq!(snapshot.process(PID).connections_closed, 1);
    }

    #[test]
    fn filter_discards_other_processes() {
        let engine = Engine::new(Settings {
            target: Some(PID),
            ..Default::default()
        });

        let other = ContextKey::new(PID + 1, 1);

        engine.on_accept_entry(other, A);
        engine.on_accept_exit(other, 7);
        engine.on_write_entry(other, 7, b"HTTP/1.1 200 OK\r\n", 17);

        engine.on_accept_entry(ctx(1), A);
        engine.on_accept_exit(ctx(1), 7);

        let snapshot = engine.snapshot();
        assert!(!snapshot.processes.contains_key(&(PID + 1)));
        assert!(!engine.is_tracked(PID + 1, 7));
        assert_eq!(snapshot.process(PID).connections_started, 1);
        assert_eq!(engine.contexts.len(), 0);
    }

    #[test]
    fn full_registry_keeps_counting_starts() {
        let engine = Engine::new(Settings {
            registry_capacity: 1,
            ..Default::default()
        });

        for (tid, fd) in [(1, 10), (2, 11)] {
            engine.on_accept_entry(ctx(tid), A);
            engine.on_accept_exit(ctx(tid), fd);
        }

        assert!(engine.is_tracked(PID, 10));
        assert!(!engine.is_tracked(PID, 11));
        assert_eq!(engine.snapshot().process(PID).connections_started, 2);
    }

    #[test]
    fn started_count_survives_interleaving() {
        let engine = engine();
        let pids = [100u32, 200, 300];

        std::thread::scope(|s| {
            for pid in pids {
                for tid in 0..4u32 {
                    let engine = &engine;
                    s.spawn(move || {
                        let ctx = ContextKey::new(pid, tid);
                        for i in 0..250u32 {
                            let fd = 1000 + tid * 1000 + i;
                            engine.on_accept_entry(ctx, A);
                            engine.on_accept_exit(ctx, fd as i64);
                            engine.on_write_entry(ctx, fd, b"HTTP/1.1 200 OK\r\n", 17);
                            engine.on_close_entry(ctx, fd);
                        }
                    });
                }
            }
        });

        let snapshot = engine.snapshot();
        for pid in pids {
            let totals = snapshot.process(pid);
            assert_eq!(totals.connections_started, 1000);
            assert_eq!(totals.connections_closed, 1000);
            assert_eq!(snapshot.responses(pid, OK), 1000);
        }
        assert_eq!(engine.registry.len(), 0);
        assert_eq!(engine.contexts.len(), 0);
    }
}
