//! Resilient cache cluster client.
//!
//! A [`CacheCluster`] keeps a fixed pool of pre-established connections to
//! each configured node, routes every command to a random healthy node,
//! fails over on errors, and degrades to a single-node registry when
//! clustering is disabled or unreachable. Cache failures never surface as
//! errors: every public operation returns a neutral value instead, so the
//! worst a dead cache can do to a caller is a miss.

pub mod executor;
pub mod health;
pub mod node;
pub mod stats;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ClusterConfig, NodeAddress};
use crate::connection::{CacheConnection, ConnectionFactory};
use crate::error::Result;
use executor::Registry;
use health::HealthMonitor;
use node::Node;
use stats::{ClusterInfo, ClusterStats, NodeInfo, PoolStats};

/// Eagerly open a node's full connection pool; the node only counts as
/// connected if every slot opened.
pub(crate) async fn open_pool<F: ConnectionFactory>(
    factory: &F,
    addr: &NodeAddress,
    pool_size: usize,
    connect_timeout: Duration,
) -> Result<Vec<Arc<F::Conn>>> {
    let attempts = (0..pool_size).map(|_| async move {
        tokio::time::timeout(connect_timeout, factory.connect(addr))
            .await
            .map_err(|_| crate::error::CacheError::Timeout(connect_timeout))?
    });
    join_all(attempts)
        .await
        .into_iter()
        .map(|conn| conn.map(Arc::new))
        .collect()
}

/// The public cache facade. Construct with [`CacheCluster::new`], call
/// [`initialize`](CacheCluster::initialize) once at startup and
/// [`disconnect`](CacheCluster::disconnect) at shutdown.
pub struct CacheCluster<F: ConnectionFactory> {
    config: ClusterConfig,
    factory: Arc<F>,
    registry: Arc<Registry<F::Conn>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    /// Serializes concurrent `initialize()` calls so only one connects the
    /// registry and spawns the monitor.
    init_lock: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    /// In-flight read-through fetches, keyed by qualified cache key.
    flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Production alias: the cluster over redis-backed connections.
pub type RedisCache = CacheCluster<crate::connection::RedisConnectionFactory>;

impl RedisCache {
    /// Build a redis-backed cluster from `REDIS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = ClusterConfig::from_env()?;
        let password = if config.enabled && !config.nodes.is_empty() {
            config.password.clone()
        } else {
            config.single_node.password.clone()
        };
        Ok(CacheCluster::new(
            config,
            crate::connection::RedisConnectionFactory::new(password),
        ))
    }
}

impl<F: ConnectionFactory> CacheCluster<F> {
    pub fn new(config: ClusterConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            registry: Arc::new(Registry::new()),
            monitor: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            started_at: Mutex::new(None),
            flights: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Connect the configured nodes and start the health monitor.
    ///
    /// Never errors: returns `false` when nothing could be brought up and
    /// fallback is not allowed. Partial success leaves unreachable nodes
    /// registered as unhealthy so the monitor can revive them later.
    pub async fn initialize(&self) -> bool {
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }

        let nodes = if !self.config.enabled || self.config.nodes.is_empty() {
            if !self.config.fallback_to_single {
                warn!("Cache clustering disabled and single-node fallback is not allowed");
                return false;
            }
            info!(
                "Cache clustering disabled; using single node {}",
                self.config.single_node.address()
            );
            match self.connect_single().await {
                Some(node) => vec![node],
                None => return false,
            }
        } else {
            match self.connect_cluster().await {
                Some(nodes) => nodes,
                None => return false,
            }
        };

        let healthy = nodes.iter().filter(|n| n.is_healthy()).count();
        info!(
            "Cache cluster initialized: {}/{} nodes healthy",
            healthy,
            nodes.len()
        );
        self.registry.set_nodes(nodes);
        *self.started_at.lock() = Some(Instant::now());
        *self.monitor.lock() = Some(HealthMonitor::spawn(
            Arc::clone(&self.registry),
            Arc::clone(&self.factory),
            self.config.clone(),
        ));
        self.initialized.store(true, Ordering::Release);
        true
    }

    async fn connect_cluster(&self) -> Option<Vec<Arc<Node<F::Conn>>>> {
        let results = join_all(self.config.nodes.iter().map(|addr| async move {
            let pool = open_pool(
                self.factory.as_ref(),
                addr,
                self.config.pool_size,
                self.config.connect_timeout,
            )
            .await;
            (addr.clone(), pool)
        }))
        .await;

        let mut nodes = Vec::with_capacity(results.len());
        let mut connected = 0usize;
        for (addr, pool) in results {
            match pool {
                Ok(pool) => {
                    info!("Connected to cache node {} ({} connections)", addr, pool.len());
                    connected += 1;
                    nodes.push(Arc::new(Node::connected(addr, pool)));
                }
                Err(e) => {
                    error!("Failed to connect cache node {}: {}", addr, e);
                    nodes.push(Arc::new(Node::unreachable(addr, self.config.max_failures)));
                }
            }
        }

        if connected == 0 {
            if self.config.fallback_to_single {
                warn!("No cluster node reachable; falling back to single-node mode");
                return self.connect_single().await.map(|node| vec![node]);
            }
            error!("No cluster node reachable and fallback is disabled");
            return None;
        }
        Some(nodes)
    }

    async fn connect_single(&self) -> Option<Arc<Node<F::Conn>>> {
        let addr = self.config.single_node.address();
        match open_pool(
            self.factory.as_ref(),
            &addr,
            self.config.pool_size,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(pool) => {
                info!("Connected to cache node {} ({} connections)", addr, pool.len());
                Some(Arc::new(Node::connected(addr, pool)))
            }
            Err(e) => {
                error!("Failed to connect cache node {}: {}", addr, e);
                None
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Fetch and deserialize a cached value. Any failure, including a value
    /// that no longer deserializes, is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let qualified = self.qualify(key);
        let raw = self
            .registry
            .execute("get", &self.config, |conn| {
                let key = qualified.clone();
                async move { conn.get(&key).await }
            })
            .await??;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undeserializable cached value for {}: {}", qualified, e);
                None
            }
        }
    }

    /// Store a value with a TTL (seconds), defaulting to the configured TTL.
    /// Returns whether the backend acknowledged the write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool {
        let qualified = self.qualify(key);
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize value for {}: {}", qualified, e);
                return false;
            }
        };
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.registry
            .execute("set", &self.config, |conn| {
                let key = qualified.clone();
                let payload = payload.clone();
                async move { conn.set_ex(&key, &payload, ttl).await }
            })
            .await
            .is_some()
    }

    pub async fn del(&self, key: &str) -> bool {
        let qualified = self.qualify(key);
        self.registry
            .execute("del", &self.config, |conn| {
                let key = qualified.clone();
                async move { conn.del(&key).await }
            })
            .await
            .unwrap_or(false)
    }

    pub async fn exists(&self, key: &str) -> bool {
        let qualified = self.qualify(key);
        self.registry
            .execute("exists", &self.config, |conn| {
                let key = qualified.clone();
                async move { conn.exists(&key).await }
            })
            .await
            .unwrap_or(false)
    }

    /// Post-increment counter; an absent key starts at 0, so the first call
    /// returns 1. Returns 0 when the cache is unavailable.
    pub async fn incr(&self, key: &str) -> i64 {
        let qualified = self.qualify(key);
        self.registry
            .execute("incr", &self.config, |conn| {
                let key = qualified.clone();
                async move { conn.incr(&key).await }
            })
            .await
            .unwrap_or(0)
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> bool {
        let qualified = self.qualify(key);
        self.registry
            .execute("expire", &self.config, |conn| {
                let key = qualified.clone();
                async move { conn.expire(&key, seconds).await }
            })
            .await
            .unwrap_or(false)
    }

    /// True if any healthy node answers a ping.
    pub async fn ping(&self) -> bool {
        self.registry
            .execute("ping", &self.config, |conn| async move { conn.ping().await })
            .await
            .is_some()
    }

    /// Read-through helper with single-flight protection: concurrent misses
    /// on the same key share one upstream fetch. Fetch errors propagate to
    /// the caller; cache errors never do.
    pub async fn cached<T, Fut, Fetch>(
        &self,
        key: &str,
        ttl: Option<u64>,
        fetch: Fetch,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fetch: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }

        let qualified = self.qualify(key);
        let flight = self
            .flights
            .entry(qualified.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // A concurrent leader may have filled the cache while we waited.
        // Either way this flight is over; drop the map entry so raced keys
        // do not accumulate.
        if let Some(hit) = self.get::<T>(key).await {
            self.flights.remove(&qualified);
            return Ok(hit);
        }

        let result = fetch().await;
        self.flights.remove(&qualified);
        let value = result?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Number of read-through fetches currently in flight.
    pub fn inflight_fetches(&self) -> usize {
        self.flights.len()
    }

    pub fn get_stats(&self) -> ClusterStats {
        let nodes = self.registry.nodes_snapshot();
        let healthy_nodes = nodes.iter().filter(|n| n.is_healthy()).count();
        let active_connections: usize = nodes
            .iter()
            .filter(|n| n.is_healthy())
            .map(|n| n.pool_size())
            .sum();
        let total_connections: usize = nodes.iter().map(|n| n.pool_size()).sum();
        let uptime = self
            .started_at
            .lock()
            .as_ref()
            .map(|started| started.elapsed())
            .unwrap_or_default();

        ClusterStats {
            total_nodes: nodes.len(),
            healthy_nodes,
            failed_nodes: nodes.len() - healthy_nodes,
            total_operations: self.registry.stats.total(),
            successful_operations: self.registry.stats.successful(),
            failed_operations: self.registry.stats.failed(),
            average_response_time_ms: self.registry.stats.average_response_time_ms(),
            uptime_secs: uptime.as_secs(),
            pool: PoolStats {
                total_connections,
                active_connections,
                idle_connections: total_connections - active_connections,
            },
        }
    }

    /// Per-node diagnostics, for operational inspection only.
    pub fn cluster_info(&self) -> ClusterInfo {
        let nodes = self
            .registry
            .nodes_snapshot()
            .iter()
            .map(|node| NodeInfo {
                address: node.addr.to_string(),
                healthy: node.is_healthy(),
                failure_count: node.failure_count(),
                last_health_check: node.last_check(),
                pool_size: node.pool_size(),
            })
            .collect();
        ClusterInfo {
            enabled: self.is_enabled(),
            nodes,
        }
    }

    /// Stop the monitor, close every pooled connection and clear the
    /// registry. Safe to call more than once.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
        for node in self.registry.take_nodes() {
            node.close_all().await;
        }
        self.registry.stats.reset();
        self.flights.clear();
        *self.started_at.lock() = None;
        self.initialized.store(false, Ordering::Release);
    }
}
