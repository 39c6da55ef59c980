use std::collections::HashMap;

mod counters;

pub use counters::CounterGroup;

/// Per-index metadata shared by grouped metrics. The exposition layer turns
/// each populated index into its own labelled series.
pub trait MetricGroup: Sync {
    fn insert_metadata(&self, idx: usize, key: String, value: String);

    fn load_metadata(&self, idx: usize) -> Option<HashMap<String, String>>;

    fn len(&self) -> usize;
}
