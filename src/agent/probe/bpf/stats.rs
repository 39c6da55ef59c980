use metriken::*;

#[metric(
    name = "httpred_probe_dropped",
    description = "The number of records the probe dropped because the ring buffer was full",
    metadata = { unit = "events", reason = "ringbuf" }
)]
pub static RINGBUF_DROPPED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "httpred_probe_dropped",
    description = "The number of accepted descriptors the probe could not track because its table was full",
    metadata = { unit = "connections", reason = "tracked" }
)]
pub static TRACKED_DROPPED: LazyCounter = LazyCounter::new(Counter::default);
