use metriken::*;

/*
 * events
 */

#[metric(
    name = "httpred_events",
    description = "The number of probe events received",
    metadata = { unit = "events", kind = "accept_entry" }
)]
pub static EVENTS_ACCEPT_ENTRY: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_events",
    description = "The number of probe events received",
    metadata = { unit = "events", kind = "accept_exit" }
)]
pub static EVENTS_ACCEPT_EXIT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_events",
    description = "The number of probe events received",
    metadata = { unit = "events", kind = "write_entry" }
)]
pub static EVENTS_WRITE_ENTRY: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_events",
    description = "The number of probe events received",
    metadata = { unit = "events", kind = "close_entry" }
)]
pub static EVENTS_CLOSE_ENTRY: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_filtered",
    description = "The number of probe events discarded by the process filter",
    metadata = { unit = "events" }
)]
pub static FILTERED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_decode_error",
    description = "The number of probe records that could not be decoded",
    metadata = { unit = "events" }
)]
pub static DECODE_ERROR: LazyCounter = LazyCounter::new(Counter::default);

/*
 * correlation
 */

#[metric(
    name = "httpred_context_miss",
    description = "The number of accept exits without a matching accept entry",
    metadata = { unit = "events" }
)]
pub static CONTEXT_MISS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_accept_failed",
    description = "The number of accept exits that returned an error",
    metadata = { unit = "events" }
)]
pub static ACCEPT_FAILED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_indeterminate",
    description = "The number of HTTP responses whose status could not be read",
    metadata = { unit = "responses" }
)]
pub static INDETERMINATE: LazyCounter = LazyCounter::new(Counter::default);

/*
 * capacity
 */

#[metric(
    name = "httpred_context_dropped",
    description = "The number of accept entries dropped because the context cache was full",
    metadata = { unit = "events" }
)]
pub static CONTEXT_DROPPED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_registry_dropped",
    description = "The number of connections not tracked because the registry was full",
    metadata = { unit = "connections" }
)]
pub static REGISTRY_DROPPED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_aggregator_dropped",
    description = "The number of increments dropped because the counter table was full",
    metadata = { unit = "events" }
)]
pub static AGGREGATOR_DROPPED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_registry_size",
    description = "The number of connections currently tracked",
    metadata = { unit = "connections" }
)]
pub static REGISTRY_SIZE: LazyGauge = LazyGauge::new(Gauge::default);

#[metric(
    name = "httpred_context_size",
    description = "The number of accepts currently in flight",
    metadata = { unit = "events" }
)]
pub static CONTEXT_SIZE: LazyGauge = LazyGauge::new(Gauge::default);
