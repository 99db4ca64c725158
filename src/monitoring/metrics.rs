//! Metrics collection and export
//!
//! This module provides Prometheus-style metrics collection.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricType {
    /// Networks under management
    Networks,
    /// Peers across all networks
    Peers,
    /// Peers currently blocked by an incident
    BlockedPeers,
    /// Incidents currently open
    OpenIncidents,
    /// Committed transactions
    Commits,
    /// Compilations rejected as invalid topology
    CompileFailures,
    /// Change events delivered to subscribers
    EventsDelivered,
    /// Deliveries deferred to a retry
    EventsRetried,
    /// Events dropped after exhausting retries
    EventsDropped,
    /// Connected change subscribers
    Subscribers,
    /// Rejected configuration fetches
    FetchRejections,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Networks => write!(f, "harmony_mesh_networks"),
            Self::Peers => write!(f, "harmony_mesh_peers"),
            Self::BlockedPeers => write!(f, "harmony_mesh_blocked_peers"),
            Self::OpenIncidents => write!(f, "harmony_mesh_open_incidents"),
            Self::Commits => write!(f, "harmony_mesh_commits_total"),
            Self::CompileFailures => write!(f, "harmony_mesh_compile_failures_total"),
            Self::EventsDelivered => write!(f, "harmony_mesh_events_delivered_total"),
            Self::EventsRetried => write!(f, "harmony_mesh_events_retried_total"),
            Self::EventsDropped => write!(f, "harmony_mesh_events_dropped_total"),
            Self::Subscribers => write!(f, "harmony_mesh_subscribers"),
            Self::FetchRejections => write!(f, "harmony_mesh_fetch_rejections_total"),
        }
    }
}

impl MetricType {
    /// Get metric help text
    pub fn help_text(&self) -> &'static str {
        match self {
            Self::Networks => "Number of managed networks",
            Self::Peers => "Number of peers across all networks",
            Self::BlockedPeers => "Number of peers quarantined by an open incident",
            Self::OpenIncidents => "Number of open incidents",
            Self::Commits => "Total committed network transactions",
            Self::CompileFailures => "Total policy compilations rejected as invalid topology",
            Self::EventsDelivered => "Total change events delivered to subscribers",
            Self::EventsRetried => "Total change event deliveries retried after a full buffer",
            Self::EventsDropped => "Total change events dropped after exhausting retries",
            Self::Subscribers => "Number of connected change subscribers",
            Self::FetchRejections => "Total configuration fetches rejected",
        }
    }

    /// Get metric type (counter, gauge)
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Self::Commits
            | Self::CompileFailures
            | Self::EventsDelivered
            | Self::EventsRetried
            | Self::EventsDropped
            | Self::FetchRejections => "counter",
            Self::Networks
            | Self::Peers
            | Self::BlockedPeers
            | Self::OpenIncidents
            | Self::Subscribers => "gauge",
        }
    }
}

/// Metric value with timestamp
#[derive(Debug, Clone)]
pub struct MetricValue {
    /// Value
    pub value: f64,
    /// Timestamp when recorded
    pub timestamp: Instant,
}

impl MetricValue {
    /// Create new metric value
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
        }
    }

    /// Age of the metric
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Metrics storage
#[derive(Default)]
pub struct Metrics {
    values: BTreeMap<MetricType, MetricValue>,
}

impl Metrics {
    /// Create new metrics storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a metric value
    pub fn record(&mut self, metric_type: MetricType, value: f64) {
        self.values.insert(metric_type, MetricValue::new(value));
    }

    /// Add to a metric value
    pub fn add(&mut self, metric_type: MetricType, delta: f64) {
        let current = self.values.get(&metric_type).map_or(0.0, |v| v.value);
        self.record(metric_type, current + delta);
    }

    /// Get a metric value
    pub fn get(&self, metric_type: MetricType) -> Option<&MetricValue> {
        self.values.get(&metric_type)
    }

    /// Get all metrics
    pub fn all(&self) -> &BTreeMap<MetricType, MetricValue> {
        &self.values
    }
}

/// Metrics collector with thread-safe access
#[derive(Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<Metrics>>,
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a gauge
    pub fn record(&self, metric_type: MetricType, value: f64) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.record(metric_type, value);
    }

    /// Bump a counter by one
    pub fn increment(&self, metric_type: MetricType) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.add(metric_type, 1.0);
    }

    /// Get a metric value
    pub fn get(&self, metric_type: MetricType) -> Option<MetricValue> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics.get(metric_type).cloned()
    }

    /// Current value, zero when never recorded
    pub fn value(&self, metric_type: MetricType) -> f64 {
        self.get(metric_type).map_or(0.0, |v| v.value)
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        let mut output = String::new();

        for (metric_type, value) in metrics.all() {
            output.push_str(&format!(
                "# HELP {} {}\n",
                metric_type,
                metric_type.help_text()
            ));
            output.push_str(&format!(
                "# TYPE {} {}\n",
                metric_type,
                metric_type.metric_kind()
            ));
            output.push_str(&format!("{} {}\n", metric_type, value.value));
        }

        output
    }

    /// Get all metrics as JSON
    pub fn export_json(&self) -> serde_json::Value {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        let mut map = serde_json::Map::new();

        for (metric_type, value) in metrics.all() {
            map.insert(
                metric_type.to_string(),
                serde_json::json!({
                    "value": value.value,
                    "age_secs": value.age().as_secs(),
                }),
            );
        }

        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_type_display() {
        assert_eq!(MetricType::Commits.to_string(), "harmony_mesh_commits_total");
        assert_eq!(MetricType::Commits.metric_kind(), "counter");
        assert_eq!(MetricType::Peers.metric_kind(), "gauge");
    }

    #[test]
    fn test_increment_and_record() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.value(MetricType::Commits), 0.0);
        collector.increment(MetricType::Commits);
        collector.increment(MetricType::Commits);
        assert_eq!(collector.value(MetricType::Commits), 2.0);

        collector.record(MetricType::Peers, 5.0);
        collector.record(MetricType::Peers, 3.0);
        assert_eq!(collector.value(MetricType::Peers), 3.0);
    }

    #[test]
    fn test_prometheus_export_is_ordered() {
        let collector = MetricsCollector::new();
        collector.record(MetricType::Subscribers, 1.0);
        collector.record(MetricType::Networks, 2.0);

        let output = collector.export_prometheus();
        let networks = output.find("harmony_mesh_networks 2").unwrap();
        let subscribers = output.find("harmony_mesh_subscribers 1").unwrap();
        assert!(networks < subscribers);
        assert!(output.contains("# TYPE harmony_mesh_networks gauge"));
    }

    #[test]
    fn test_json_export() {
        let collector = MetricsCollector::new();
        collector.increment(MetricType::EventsDelivered);

        let json = collector.export_json();
        assert_eq!(json["harmony_mesh_events_delivered_total"]["value"], 1.0);
    }
}
