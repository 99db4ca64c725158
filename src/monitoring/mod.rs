//! Monitoring and observability
//!
//! Per-network statistics refreshed on every commit, and the metrics
//! collector exported on `/metrics`.

use crate::model::{NetworkId, NetworkRecord, TrustState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

mod metrics;

pub use metrics::{MetricType, MetricValue, Metrics, MetricsCollector};

/// Snapshot of one network's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Network identifier
    pub network_id: NetworkId,
    /// Network name
    pub name: String,
    /// Committed version
    pub version: u64,
    /// Total peers
    pub total_peers: usize,
    /// Jump peers
    pub jump_peers: usize,
    /// Isolated peers
    pub isolated_peers: usize,
    /// Blocked peers
    pub blocked_peers: usize,
    /// Open incidents
    pub open_incidents: usize,
    /// Whether the latest version compiled cleanly
    pub policy_current: bool,
}

impl NetworkStats {
    /// Summarize a record
    pub fn from_record(record: &NetworkRecord, policy_current: bool) -> Self {
        let count = |state: TrustState| record.peers.values().filter(|p| p.trust == state).count();
        Self {
            network_id: record.id(),
            name: record.network.name.clone(),
            version: record.version,
            total_peers: record.peers.len(),
            jump_peers: record.peers.values().filter(|p| p.is_jump()).count(),
            isolated_peers: count(TrustState::Isolated),
            blocked_peers: count(TrustState::Blocked),
            open_incidents: record.incidents.values().filter(|i| i.is_open()).count(),
            policy_current,
        }
    }
}

/// Monitor for tracking network statistics
pub struct Monitor {
    stats: RwLock<BTreeMap<NetworkId, NetworkStats>>,
    metrics: Arc<MetricsCollector>,
}

impl Monitor {
    /// Create a new monitor
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(BTreeMap::new()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Store fresh statistics for a network and refresh the gauges
    pub fn update_network(&self, stats: NetworkStats) {
        debug!(
            "Network '{}' v{}: {} peers, {} blocked",
            stats.name, stats.version, stats.total_peers, stats.blocked_peers
        );
        let mut all = self.stats.write().unwrap_or_else(|e| e.into_inner());
        all.insert(stats.network_id, stats);
        self.refresh_gauges(&all);
    }

    /// Forget a deleted network
    pub fn remove_network(&self, id: &NetworkId) {
        let mut all = self.stats.write().unwrap_or_else(|e| e.into_inner());
        all.remove(id);
        self.refresh_gauges(&all);
    }

    /// Get statistics for a network
    pub fn get_stats(&self, id: &NetworkId) -> Option<NetworkStats> {
        let all = self.stats.read().unwrap_or_else(|e| e.into_inner());
        all.get(id).cloned()
    }

    /// Get all network statistics, ordered by network id
    pub fn get_all_stats(&self) -> Vec<NetworkStats> {
        let all = self.stats.read().unwrap_or_else(|e| e.into_inner());
        all.values().cloned().collect()
    }

    /// Get metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    fn refresh_gauges(&self, all: &BTreeMap<NetworkId, NetworkStats>) {
        let sum = |f: fn(&NetworkStats) -> usize| all.values().map(f).sum::<usize>() as f64;
        self.metrics.record(MetricType::Networks, all.len() as f64);
        self.metrics.record(MetricType::Peers, sum(|s| s.total_peers));
        self.metrics.record(MetricType::BlockedPeers, sum(|s| s.blocked_peers));
        self.metrics.record(MetricType::OpenIncidents, sum(|s| s.open_incidents));
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}
