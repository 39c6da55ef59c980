use super::MetricGroup;

use metriken::{Metric, Value};
use parking_lot::RwLock;
use thiserror::Error;

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Error, Debug, PartialEq)]
pub enum CounterGroupError {
    #[error("the index is higher than the counter group size")]
    InvalidIndex,
}

/// A fixed-size group of counters, one per index (eg: per CPU).
///
/// Values are stored densely and only allocated once the first value is set.
/// Metadata is sparse and only takes space for indices that have some.
pub struct CounterGroup {
    values: OnceLock<RwLock<Vec<u64>>>,
    metadata: OnceLock<RwLock<HashMap<usize, HashMap<String, String>>>>,
    entries: usize,
}

impl Metric for CounterGroup {
    fn as_any(&self) -> std::option::Option<&(dyn std::any::Any + 'static)> {
        Some(self)
    }

    fn value(&self) -> std::option::Option<metriken::Value<'_>> {
        Some(Value::Other(self))
    }
}

impl CounterGroup {
    pub const fn new(entries: usize) -> Self {
        Self {
            values: OnceLock::new(),
            metadata: OnceLock::new(),
            entries,
        }
    }

    /// Sets the counter at a given index to the provided value
    pub fn set(&self, idx: usize, value: u64) -> Result<(), CounterGroupError> {
        if idx >= self.entries {
            return Err(CounterGroupError::InvalidIndex);
        }

        self.get_or_init().write()[idx] = value;

        Ok(())
    }

    /// Load the counter values, `None` if nothing was ever set.
    pub fn load(&self) -> Option<Vec<u64>> {
        self.values.get().map(|v| v.read().clone())
    }

    fn get_or_init(&self) -> &RwLock<Vec<u64>> {
        self.values.get_or_init(|| vec![0; self.entries].into())
    }
}

impl MetricGroup for CounterGroup {
    fn insert_metadata(&self, idx: usize, key: String, value: String) {
        if idx >= self.entries {
            return;
        }

        let metadata = self.metadata.get_or_init(|| RwLock::new(HashMap::new()));
        metadata.write().entry(idx).or_default().insert(key, value);
    }

    fn load_metadata(&self, idx: usize) -> Option<HashMap<String, String>> {
        self.metadata
            .get()
            .and_then(|m| m.read().get(&idx).cloned())
    }

    fn len(&self) -> usize {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_load() {
        let group = CounterGroup::new(4);
        assert_eq!(group.load(), None);

        group.set(2, 40).unwrap();
        assert_eq!(group.load(), Some(vec![0, 0, 40, 0]));

        group.set(2, 41).unwrap();
        assert_eq!(group.load(), Some(vec![0, 0, 41, 0]));

        assert_eq!(group.set(4, 1), Err(CounterGroupError::InvalidIndex));
    }

    #[test]
    fn metadata() {
        let group = CounterGroup::new(2);
        assert_eq!(group.len(), 2);
        assert_eq!(group.load_metadata(0), None);

        group.insert_metadata(1, "id".to_string(), "1".to_string());
        group.insert_metadata(1, "core".to_string(), "0".to_string());
        group.insert_metadata(7, "id".to_string(), "7".to_string());

        let metadata = group.load_metadata(1).unwrap();
        assert_eq!(metadata.get("id").map(String::as_str), Some("1"));
        assert_eq!(metadata.get("core").map(String::as_str), Some("0"));
        assert_eq!(group.load_metadata(7), None);
    }
}
