use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Aggregate counters for one cluster instance.
///
/// Counters accumulate monotonically from `initialize()` until
/// `disconnect()`. Health counts are derived from the registry at snapshot
/// time, so `healthy_nodes + failed_nodes == total_nodes` always holds.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub failed_nodes: usize,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Running mean over successful operations only, in milliseconds.
    pub average_response_time_ms: f64,
    pub uptime_secs: u64,
    pub pool: PoolStats,
}

/// Pool utilization breakdown across all nodes.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    /// Connections belonging to currently healthy nodes.
    pub active_connections: usize,
    /// Connections parked on unhealthy nodes.
    pub idle_connections: usize,
}

/// Per-node diagnostic entry, for operational inspection only.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub address: String,
    pub healthy: bool,
    pub failure_count: u32,
    pub last_health_check: DateTime<Utc>,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub enabled: bool,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Default)]
struct Latency {
    mean_ms: f64,
}

/// Lock-light operation recorder shared by the executor and the facade.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    successful: AtomicU64,
    failed: AtomicU64,
    latency: Mutex<Latency>,
}

impl StatsRecorder {
    pub fn record_success(&self, elapsed: Duration) {
        // Weight the running mean by the prior success count.
        let mut latency = self.latency.lock();
        let prior = self.successful.fetch_add(1, Ordering::Relaxed) as f64;
        let sample = elapsed.as_secs_f64() * 1000.0;
        latency.mean_ms = (latency.mean_ms * prior + sample) / (prior + 1.0);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.successful() + self.failed()
    }

    pub fn average_response_time_ms(&self) -> f64 {
        self.latency.lock().mean_ms
    }

    pub fn reset(&self) {
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.latency.lock().mean_ms = 0.0;
    }
}
