use metriken_exposition::{Counter, Gauge, Snapshot};

use std::collections::HashMap;
use std::time::SystemTime;

/// Renders a snapshot in the Prometheus text exposition format.
///
/// The exported name is the `metric` metadata entry and every other entry
/// becomes a label. Series are sorted and a `# TYPE` line is written once
/// per metric name.
pub fn render(snapshot: &Snapshot) -> String {
    let (systemtime, counters, gauges) = match snapshot {
        Snapshot::V1(s) => (s.systemtime, &s.counters, &s.gauges),
        Snapshot::V2(s) => (s.systemtime, &s.counters, &s.gauges),
    };

    let timestamp = systemtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let mut series: Vec<(String, &str, String)> = Vec::new();

    for metric in counters.iter() {
        series.push(metric.series(timestamp));
    }

    for metric in gauges.iter() {
        series.push(metric.series(timestamp));
    }

    series.sort();
    series.dedup();

    let mut data = String::new();
    let mut last: Option<&str> = None;

    for (name, kind, line) in series.iter() {
        if last != Some(name.as_str()) {
            data.push_str(&format!("# TYPE {name} {kind}\n"));
            last = Some(name.as_str());
        }

        data.push_str(line);
        data.push('\n');
    }

    data
}

trait SimplePrometheusMetric {
    fn name(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn metadata(&self) -> &HashMap<String, String>;
    fn value(&self) -> String;
}

trait PrometheusFormat {
    /// Returns the metric name, its type, and the sample line.
    fn series(&self, timestamp: u128) -> (String, &'static str, String);
}

impl<T: SimplePrometheusMetric> PrometheusFormat for T {
    fn series(&self, timestamp: u128) -> (String, &'static str, String) {
        let metadata = self.metadata();

        let name = metadata
            .get("metric")
            .map(|name| sanitize(name))
            .unwrap_or_else(|| sanitize(self.name()));

        let labels = format_metadata(metadata);

        let name_with_metadata = if labels.is_empty() {
            name.clone()
        } else {
            format!("{name}{{{labels}}}")
        };

        let value = self.value();

        (
            name,
            self.kind(),
            format!("{name_with_metadata} {value} {timestamp}"),
        )
    }
}

impl SimplePrometheusMetric for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "counter"
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    fn value(&self) -> String {
        format!("{}", self.value)
    }
}

impl SimplePrometheusMetric for Gauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "gauge"
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    fn value(&self) -> String {
        format!("{}", self.value)
    }
}

fn format_metadata(metadata: &HashMap<String, String>) -> String {
    let mut metadata: Vec<String> = metadata
        .iter()
        .filter(|(key, _)| key.as_str() != "metric")
        .map(|(key, value)| format!("{}=\"{}\"", sanitize(key), escape(value)))
        .collect();
    metadata.sort();
    metadata.join(", ")
}

// metric and label names are limited to [a-zA-Z0-9_]
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
