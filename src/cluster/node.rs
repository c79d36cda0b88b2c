use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::config::NodeAddress;
use crate::connection::CacheConnection;

/// Health bookkeeping for one node.
///
/// A node is Unhealthy iff `failure_count >= max_failures`. Failures add one;
/// each successful ping subtracts exactly one, so recovery is gradual: a
/// chronically failing node needs `max_failures` clean check cycles before it
/// takes traffic again.
#[derive(Debug)]
struct HealthState {
    healthy: bool,
    failure_count: u32,
    last_check: DateTime<Utc>,
}

/// One backend node: its address, a fixed pool of pre-established
/// connections, and its health state.
///
/// The pool is filled eagerly during initialization and only replaced by the
/// health monitor when a node that was unreachable at startup comes back.
/// Connections are shared by index, never checked out.
pub struct Node<C> {
    pub addr: NodeAddress,
    pool: RwLock<Vec<Arc<C>>>,
    health: Mutex<HealthState>,
}

impl<C> Node<C> {
    /// A node whose pool opened fully at startup.
    pub fn connected(addr: NodeAddress, pool: Vec<Arc<C>>) -> Self {
        Self {
            addr,
            pool: RwLock::new(pool),
            health: Mutex::new(HealthState {
                healthy: true,
                failure_count: 0,
                last_check: Utc::now(),
            }),
        }
    }

    /// A node that failed to connect at startup. It starts Unhealthy with an
    /// empty pool; the health monitor may revive it later.
    pub fn unreachable(addr: NodeAddress, max_failures: u32) -> Self {
        Self {
            addr,
            pool: RwLock::new(Vec::new()),
            health: Mutex::new(HealthState {
                healthy: false,
                failure_count: max_failures,
                last_check: Utc::now(),
            }),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.lock().healthy
    }

    pub fn failure_count(&self) -> u32 {
        self.health.lock().failure_count
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        self.health.lock().last_check
    }

    pub fn pool_size(&self) -> usize {
        self.pool.read().len()
    }

    pub fn has_pool(&self) -> bool {
        !self.pool.read().is_empty()
    }

    /// Hand out a pool slot for the given rotation counter.
    pub fn connection(&self, counter: u64) -> Option<Arc<C>> {
        let pool = self.pool.read();
        if pool.is_empty() {
            return None;
        }
        let index = (counter % pool.len() as u64) as usize;
        Some(Arc::clone(&pool[index]))
    }

    /// Install a freshly opened pool on a node revived by the monitor.
    pub fn replace_pool(&self, pool: Vec<Arc<C>>) {
        *self.pool.write() = pool;
    }

    /// Record a failed operation or ping. Returns `true` when this failure
    /// flipped the node Unhealthy, so callers log the transition exactly once.
    pub fn record_failure(&self, max_failures: u32) -> bool {
        let mut health = self.health.lock();
        health.failure_count = health.failure_count.saturating_add(1);
        if health.healthy && health.failure_count >= max_failures {
            health.healthy = false;
            true
        } else {
            false
        }
    }

    /// Record a failed periodic ping, stamping the check time.
    pub fn record_ping_failure(&self, max_failures: u32) -> bool {
        self.health.lock().last_check = Utc::now();
        self.record_failure(max_failures)
    }

    /// Record a successful periodic ping: one step of recovery. Returns
    /// `true` when the node just crossed back to Healthy.
    pub fn record_ping_success(&self, max_failures: u32) -> bool {
        let mut health = self.health.lock();
        health.last_check = Utc::now();
        health.failure_count = health.failure_count.saturating_sub(1);
        if !health.healthy && health.failure_count < max_failures {
            health.healthy = true;
            true
        } else {
            false
        }
    }
}

impl<C: CacheConnection> Node<C> {
    /// Best-effort close of every pooled connection.
    pub async fn close_all(&self) {
        let pool = std::mem::take(&mut *self.pool.write());
        for conn in pool {
            if let Err(e) = conn.close().await {
                warn!("Failed to close connection to {}: {}", self.addr, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node<()> {
        Node::connected(NodeAddress::new("cache-1", 6379), vec![Arc::new(()), Arc::new(())])
    }

    #[test]
    fn single_failure_does_not_flip_unhealthy() {
        let node = node();
        assert!(!node.record_failure(3));
        assert!(node.is_healthy());
        assert_eq!(node.failure_count(), 1);
    }

    #[test]
    fn flips_unhealthy_exactly_once_at_threshold() {
        let node = node();
        assert!(!node.record_failure(3));
        assert!(!node.record_failure(3));
        assert!(node.record_failure(3));
        assert!(!node.is_healthy());
        // Further failures accumulate without re-reporting the transition.
        assert!(!node.record_failure(3));
        assert_eq!(node.failure_count(), 4);
    }

    #[test]
    fn recovery_takes_one_ping_per_failure() {
        let node = node();
        for _ in 0..3 {
            node.record_failure(3);
        }
        assert!(!node.is_healthy());
        assert!(!node.record_ping_success(3));
        assert!(!node.is_healthy());
        // Second success drops failure_count below the threshold.
        assert!(node.record_ping_success(3));
        assert!(node.is_healthy());
        assert_eq!(node.failure_count(), 1);
    }

    #[test]
    fn failure_count_floors_at_zero() {
        let node = node();
        assert!(!node.record_ping_success(3));
        assert_eq!(node.failure_count(), 0);
    }

    #[test]
    fn rotation_wraps_pool() {
        let node = node();
        assert!(node.connection(0).is_some());
        assert!(node.connection(5).is_some());
        let empty: Node<()> = Node::unreachable(NodeAddress::new("cache-2", 6379), 3);
        assert!(empty.connection(0).is_none());
        assert!(!empty.is_healthy());
    }
}
