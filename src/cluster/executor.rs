use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, warn};

use crate::cluster::node::Node;
use crate::cluster::stats::StatsRecorder;
use crate::config::ClusterConfig;
use crate::connection::CacheConnection;

/// The set of known nodes plus everything commands mutate while in flight:
/// operation counters and the shared pool-rotation index.
///
/// Shared between the facade and the health monitor.
pub(crate) struct Registry<C> {
    nodes: RwLock<Vec<Arc<Node<C>>>>,
    pub(crate) stats: StatsRecorder,
    rotation: AtomicU64,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            stats: StatsRecorder::default(),
            rotation: AtomicU64::new(0),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<Arc<Node<C>>>) {
        *self.nodes.write() = nodes;
    }

    pub fn take_nodes(&self) -> Vec<Arc<Node<C>>> {
        std::mem::take(&mut *self.nodes.write())
    }

    pub fn nodes_snapshot(&self) -> Vec<Arc<Node<C>>> {
        self.nodes.read().clone()
    }

    /// Uniform random pick among healthy nodes; `None` means the whole
    /// cluster is down and the caller must fail fast.
    pub fn healthy_node(&self) -> Option<Arc<Node<C>>> {
        let nodes = self.nodes.read();
        let healthy: Vec<&Arc<Node<C>>> = nodes.iter().filter(|n| n.is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..healthy.len());
        Some(Arc::clone(healthy[index]))
    }

    /// Process-wide rotation counter; `counter % pool_size` picks the slot,
    /// spreading load across each node's pool over time.
    pub fn next_rotation(&self) -> u64 {
        self.rotation.fetch_add(1, Ordering::Relaxed)
    }
}

impl<C: CacheConnection> Registry<C> {
    /// Run one cache command with retry and failover.
    ///
    /// Each attempt picks a fresh healthy node and races the command against
    /// `command_timeout`. The timeout only stops waiting locally: the losing
    /// command may still complete on the server side. Failures feed the
    /// node's failure count; after `max_retries` attempts, or immediately
    /// when no healthy node exists, the operation is recorded as failed and
    /// `None` is returned. Worst case for a doomed operation is
    /// `max_retries * (command_timeout + retry_delay)`.
    pub async fn execute<T, Fut>(
        &self,
        operation: &str,
        config: &ClusterConfig,
        command: impl Fn(Arc<C>) -> Fut,
    ) -> Option<T>
    where
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let attempts = config.max_retries.max(1);
        for attempt in 1..=attempts {
            let Some(node) = self.healthy_node() else {
                warn!(operation, "No healthy cache node available");
                self.stats.record_failure();
                return None;
            };
            let Some(conn) = node.connection(self.next_rotation()) else {
                // A healthy node without a pool means the monitor is mid-revive.
                debug!(operation, node = %node.addr, "Node has no pooled connections yet");
                if node.record_failure(config.max_failures) {
                    warn!("Cache node {} marked unhealthy", node.addr);
                }
                continue;
            };

            let started = Instant::now();
            match tokio::time::timeout(config.command_timeout, command(conn)).await {
                Ok(Ok(value)) => {
                    self.stats.record_success(started.elapsed());
                    return Some(value);
                }
                Ok(Err(e)) => {
                    warn!(operation, node = %node.addr, attempt, "Cache command failed: {}", e);
                }
                Err(_) => {
                    warn!(
                        operation,
                        node = %node.addr,
                        attempt,
                        "Cache command timed out after {:?}",
                        config.command_timeout
                    );
                }
            }

            if node.record_failure(config.max_failures) {
                warn!("Cache node {} marked unhealthy", node.addr);
            }
            if attempt < attempts {
                tokio::time::sleep(config.retry_delay).await;
            }
        }

        self.stats.record_failure();
        None
    }
}
