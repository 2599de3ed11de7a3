use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const METRICS_NAMESPACE: &str = "vermon";

pub const CLUSTER_VERSION_PROPOSED: &str = "cluster_version.proposed";
pub const CLUSTER_VERSION_PROPOSAL_FAILED: &str = "cluster_version.proposal_failed";
pub const CLUSTER_VERSION_DEFERRED: &str = "cluster_version.deferred";
pub const HIGHER_VERSION_PEERS: &str = "cluster_version.higher_peers";
pub const STORAGE_MIGRATIONS: &str = "storage_version.migrations";
pub const STORAGE_MIGRATION_FAILED: &str = "storage_version.migration_failed";
pub const DOWNGRADE_CANCELLED: &str = "downgrade.cancelled";
pub const DOWNGRADE_CANCEL_FAILED: &str = "downgrade.cancel_failed";
pub const DOWNGRADE_PENDING: &str = "downgrade.pending";

pub const CLUSTER_VERSION_GAUGE: &str = "cluster_version.current";
pub const STORAGE_VERSION_GAUGE: &str = "storage_version.current";

/// Namespaced counters and gauges shared between the monitor and the
/// completion callbacks of its non-blocking proposals.
#[derive(Debug, Clone)]
pub struct MonitorMetrics {
    prefix: Arc<String>,
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Debug, Default)]
struct MetricsState {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.lookup(&self.counters, name)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges
            .get(name)
            .or_else(|| self.gauges.get(&qualify(METRICS_NAMESPACE, name)))
            .copied()
    }

    fn lookup(&self, map: &BTreeMap<String, u64>, name: &str) -> u64 {
        map.get(name)
            .or_else(|| map.get(&qualify(METRICS_NAMESPACE, name)))
            .copied()
            .unwrap_or(0)
    }
}

impl MonitorMetrics {
    pub fn new(namespace: impl Into<String>) -> Self {
        let raw = namespace.into();
        let prefix = if raw.ends_with('.') {
            raw
        } else {
            format!("{}.", raw)
        };
        Self {
            prefix: Arc::new(prefix),
            inner: Arc::new(Mutex::new(MetricsState::default())),
        }
    }

    pub fn inc_counter(&self, name: &str, delta: u64) -> u64 {
        let key = self.qualify(name);
        let mut state = self.inner.lock();
        let counter = state.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&self, name: &str, value: u64) {
        let key = self.qualify(name);
        self.inner.lock().gauges.insert(key, value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.inner.lock();
        MetricsSnapshot {
            counters: state.counters.clone(),
            gauges: state.gauges.clone(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if name.starts_with(self.prefix.as_str()) {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new(METRICS_NAMESPACE)
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace.trim_end_matches('.'), name)
}

/// Packs a major.minor pair into a single gauge value (`major * 1000 + minor`).
pub fn version_gauge(major: u64, minor: u64) -> u64 {
    major.saturating_mul(1000).saturating_add(minor)
}
