use crate::agent::engine::{AggregatorSnapshot, Engine};
use crate::agent::metrics::{CounterGroup, MetricGroup};
use crate::agent::samplers::Sampler;
use crate::common::process_name;

use metriken::Value;
use metriken_exposition::{Counter, Gauge, Snapshot, SnapshotV2};
use tracing::debug;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub const CONNECTIONS_STARTED: &str = "requests_started_connections_total";
pub const CONNECTIONS_CLOSED: &str = "requests_closed_connections_total";
pub const HTTP_REQUESTS: &str = "http_requests_total";

// pids are reused, so a resolved name is only trusted for this long
const NAME_TTL: Duration = Duration::from_secs(60);

/// The `comm` of each pid seen in the counters.
///
/// A resolved name is looked up again once it is older than `NAME_TTL`. A pid
/// whose process could not be found is looked up again on every refresh.
#[derive(Default)]
struct ProcessNames {
    names: HashMap<u32, (Instant, Option<String>)>,
}

impl ProcessNames {
    fn resolve(
        &mut self,
        pids: impl Iterator<Item = u32>,
        now: Instant,
        lookup: impl Fn(u32) -> Option<String>,
    ) {
        for pid in pids {
            let stale = match self.names.get(&pid) {
                Some((resolved, Some(_))) => now.saturating_duration_since(*resolved) >= NAME_TTL,
                _ => true,
            };

            if stale {
                self.names.insert(pid, (now, lookup(pid)));
            }
        }
    }

    fn get(&self, pid: u32) -> Option<&str> {
        self.names.get(&pid).and_then(|(_, name)| name.as_deref())
    }
}

/// Builds snapshots of every exported metric and caches the latest one for
/// `ttl` so that concurrent scrapes share a single refresh.
pub struct SnapshotBuilder {
    last: Option<Instant>,
    engine: Arc<Engine>,
    samplers: Arc<Box<[Box<dyn Sampler>]>>,
    names: ProcessNames,
    snapshot: Snapshot,
    ttl: Duration,
}

impl SnapshotBuilder {
    pub fn new(
        engine: Arc<Engine>,
        samplers: Arc<Box<[Box<dyn Sampler>]>>,
        ttl: Duration,
    ) -> Self {
        Self {
            last: None,
            engine,
            samplers,
            names: ProcessNames::default(),
            snapshot: Snapshot::V2(empty(SystemTime::UNIX_EPOCH, Duration::ZERO)),
            ttl,
        }
    }

    async fn refresh(&mut self) {
        let last = Instant::now();

        // get start timestamp
        let timestamp = SystemTime::now();

        let s: Vec<_> = self
            .samplers
            .iter()
            .map(|s| s.refresh_with_logging())
            .collect();

        let start = Instant::now();
        futures::future::join_all(s).await;
        self.engine.update_gauges();
        let duration = start.elapsed();
        debug!("sampling latency: {} us", duration.as_micros());

        let mut snapshot = empty(timestamp, duration);

        push_metriken(&mut snapshot);

        let totals = self.engine.snapshot();
        self.names
            .resolve(totals.processes.keys().copied(), last, process_name);
        push_totals(&mut snapshot, &totals, &self.names);

        self.snapshot = Snapshot::V2(snapshot);
        self.last = Some(last);
    }

    pub async fn build(&mut self, now: Instant) -> &Snapshot {
        if let Some(last) = self.last {
            if now.duration_since(last) < self.ttl {
                return &self.snapshot;
            }
        }

        self.refresh().await;

        &self.snapshot
    }
}

fn empty(systemtime: SystemTime, duration: Duration) -> SnapshotV2 {
    SnapshotV2 {
        systemtime,
        duration,
        metadata: [
            ("source".to_string(), env!("CARGO_PKG_NAME").to_string()),
            ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ]
        .into(),
        counters: Vec::new(),
        gauges: Vec::new(),
        histograms: Vec::new(),
    }
}

/// Adds the self-monitoring metrics and counter groups registered with
/// metriken.
fn push_metriken(s: &mut SnapshotV2) {
    for (metric_id, metric) in metriken::metrics().iter().enumerate() {
        let value = metric.value();

        if value.is_none() {
            continue;
        }

        let mut metadata: HashMap<String, String> =
            [("metric".to_string(), metric.name().to_string())].into();

        for (k, v) in metric.metadata().iter() {
            metadata.insert(k.to_string(), v.to_string());
        }

        let name = format!("{metric_id}");

        match value {
            Some(Value::Counter(value)) => s.counters.push(Counter {
                name,
                value,
                metadata,
            }),
            Some(Value::Gauge(value)) => s.gauges.push(Gauge {
                name,
                value,
                metadata,
            }),
            Some(Value::Other(any)) => {
                if let Some(counters) = any.downcast_ref::<CounterGroup>() {
                    if let Some(c) = counters.load() {
                        for (counter_id, counter) in c.iter().enumerate() {
                            if *counter == 0 {
                                continue;
                            }

                            let mut metadata = metadata.clone();

                            metadata.insert("id".to_string(), counter_id.to_string());

                            if let Some(m) = counters.load_metadata(counter_id) {
                                metadata.extend(m);
                            }

                            s.counters.push(Counter {
                                name: format!("{metric_id}x{counter_id}"),
                                value: *counter,
                                metadata,
                            })
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Adds the per-process connection and response counters.
fn push_totals(
    s: &mut SnapshotV2,
    totals: &AggregatorSnapshot,
    names: &ProcessNames,
) {
    let labels = |metric: &str, pid: u32| -> HashMap<String, String> {
        let mut metadata: HashMap<String, String> = [
            ("metric".to_string(), metric.to_string()),
            ("pid".to_string(), pid.to_string()),
        ]
        .into();

        if let Some(comm) = names.get(pid) {
            metadata.insert("comm".to_string(), comm.to_string());
        }

        metadata
    };

    for (pid, process) in totals.processes.iter() {
        s.counters.push(Counter {
            name: format!("{CONNECTIONS_STARTED}x{pid}"),
            value: process.connections_started,
            metadata: labels(CONNECTIONS_STARTED, *pid),
        });

        s.counters.push(Counter {
            name: format!("{CONNECTIONS_CLOSED}x{pid}"),
            value: process.connections_closed,
            metadata: labels(CONNECTIONS_CLOSED, *pid),
        });
    }

    for (key, value) in totals.responses.iter() {
        let mut metadata = labels(HTTP_REQUESTS, key.pid);
        metadata.insert("code".to_string(), key.status.to_string());

        s.counters.push(Counter {
            name: format!("{HTTP_REQUESTS}x{}x{}", key.pid, key.status),
            value: *value,
            metadata,
        });
    }
}
