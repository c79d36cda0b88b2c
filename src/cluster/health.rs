use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cluster::executor::Registry;
use crate::cluster::node::Node;
use crate::config::ClusterConfig;
use crate::connection::{CacheConnection, ConnectionFactory};

/// Periodic liveness probe with hysteresis.
///
/// Every `health_check_interval` the monitor pings every node, healthy or
/// not. Each clean ping walks the failure count back by one; a node only
/// returns to rotation once the count drops below `max_failures` again, so a
/// flapping node cannot bounce in and out on single results.
pub(crate) struct HealthMonitor;

impl HealthMonitor {
    pub fn spawn<F: ConnectionFactory>(
        registry: Arc<Registry<F::Conn>>,
        factory: Arc<F>,
        config: ClusterConfig,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.health_check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; initialization just
            // probed every node, so skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                Self::check_all(&registry, factory.as_ref(), &config).await;
            }
        })
    }

    pub async fn check_all<F: ConnectionFactory>(
        registry: &Registry<F::Conn>,
        factory: &F,
        config: &ClusterConfig,
    ) {
        for node in registry.nodes_snapshot() {
            Self::check_node(registry, factory, config, &node).await;
        }
    }

    async fn check_node<F: ConnectionFactory>(
        registry: &Registry<F::Conn>,
        factory: &F,
        config: &ClusterConfig,
        node: &Node<F::Conn>,
    ) {
        // A node that was unreachable at startup has no pool; a successful
        // reconnect of the full pool counts as its ping for this cycle.
        if !node.has_pool() {
            match super::open_pool(factory, &node.addr, config.pool_size, config.connect_timeout)
                .await
            {
                Ok(pool) => {
                    info!("Reconnected pool of {} to cache node {}", pool.len(), node.addr);
                    node.replace_pool(pool);
                    if node.record_ping_success(config.max_failures) {
                        info!("Cache node {} is healthy again", node.addr);
                    }
                }
                Err(e) => {
                    debug!("Cache node {} still unreachable: {}", node.addr, e);
                    node.record_ping_failure(config.max_failures);
                }
            }
            return;
        }

        let Some(conn) = node.connection(registry.next_rotation()) else {
            return;
        };
        match tokio::time::timeout(config.command_timeout, conn.ping()).await {
            Ok(Ok(())) => {
                if node.record_ping_success(config.max_failures) {
                    info!("Cache node {} is healthy again", node.addr);
                }
            }
            Ok(Err(e)) => {
                warn!("Health check failed for cache node {}: {}", node.addr, e);
                if node.record_ping_failure(config.max_failures) {
                    warn!("Cache node {} marked unhealthy", node.addr);
                }
            }
            Err(_) => {
                warn!(
                    "Health check timed out for cache node {} after {:?}",
                    node.addr, config.command_timeout
                );
                if node.record_ping_failure(config.max_failures) {
                    warn!("Cache node {} marked unhealthy", node.addr);
                }
            }
        }
    }
}
