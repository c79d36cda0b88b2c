pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;

// Re-export common types
pub use cluster::stats::{ClusterInfo, ClusterStats, NodeInfo, PoolStats};
pub use cluster::{CacheCluster, RedisCache};
pub use config::{ClusterConfig, NodeAddress, SingleNodeConfig};
pub use connection::{CacheConnection, ConnectionFactory, RedisConnectionFactory};
pub use error::{CacheError, Result};
