use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CacheError;

/// Address of one backing cache node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CacheError::config(format!("Invalid node address '{}': expected host:port", s)))?;
        if host.is_empty() {
            return Err(CacheError::config(format!("Invalid node address '{}': empty host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CacheError::config(format!("Invalid node address '{}': bad port '{}'", s, port)))?;
        Ok(NodeAddress::new(host, port))
    }
}

/// Connection parameters for the single-node fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleNodeConfig {
    #[serde(default = "default_single_host")]
    pub host: String,
    #[serde(default = "default_single_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for SingleNodeConfig {
    fn default() -> Self {
        Self {
            host: default_single_host(),
            port: default_single_port(),
            password: None,
        }
    }
}

impl SingleNodeConfig {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.host.clone(), self.port)
    }
}

/// Validated cluster configuration.
///
/// Loaded from the environment via [`ClusterConfig::from_env`], or built
/// directly in tests. All durations default to the values the rest of the
/// platform has always used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<NodeAddress>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: Duration,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: Duration,
    /// Default TTL in seconds applied when `set` is called without one.
    #[serde(default = "default_ttl")]
    pub default_ttl: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_true")]
    pub fallback_to_single: bool,
    #[serde(default)]
    pub single_node: SingleNodeConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nodes: Vec::new(),
            password: None,
            pool_size: default_pool_size(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            max_failures: default_max_failures(),
            health_check_interval: default_health_check_interval(),
            default_ttl: default_ttl(),
            key_prefix: default_key_prefix(),
            fallback_to_single: default_true(),
            single_node: SingleNodeConfig::default(),
        }
    }
}

fn default_pool_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_command_timeout() -> Duration {
    Duration::from_millis(3000)
}

fn default_max_failures() -> u32 {
    3
}

fn default_health_check_interval() -> Duration {
    Duration::from_millis(30000)
}

fn default_ttl() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "pitchey".to_string()
}

fn default_single_host() -> String {
    "localhost".to_string()
}

fn default_single_port() -> u16 {
    6379
}

fn default_true() -> bool {
    true
}

impl ClusterConfig {
    /// Load the configuration from `REDIS_*` environment variables.
    ///
    /// Fails only on malformed input (a node spec that is not `host:port`,
    /// a non-numeric port). Unset variables fall back to defaults.
    pub fn from_env() -> crate::error::Result<Self> {
        let mut config = Self {
            enabled: env_bool("REDIS_CLUSTER_ENABLED", false),
            password: env_opt("REDIS_CLUSTER_PASSWORD"),
            pool_size: env_parse("REDIS_CONNECTION_POOL_SIZE", default_pool_size())?,
            max_retries: env_parse("REDIS_MAX_RETRIES", default_max_retries())?,
            retry_delay: Duration::from_millis(env_parse("REDIS_RETRY_DELAY", 1000)?),
            connect_timeout: Duration::from_millis(env_parse("REDIS_CONNECT_TIMEOUT", 5000)?),
            command_timeout: Duration::from_millis(env_parse("REDIS_COMMAND_TIMEOUT", 3000)?),
            max_failures: env_parse("REDIS_MAX_FAILURES", default_max_failures())?,
            health_check_interval: Duration::from_millis(env_parse(
                "REDIS_HEALTH_CHECK_INTERVAL",
                30000,
            )?),
            default_ttl: env_parse("CACHE_TTL", default_ttl())?,
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| default_key_prefix()),
            // Fallback stays on unless explicitly switched off.
            fallback_to_single: env_bool("REDIS_FALLBACK_TO_SINGLE", true),
            single_node: SingleNodeConfig {
                host: std::env::var("REDIS_HOST").unwrap_or_else(|_| default_single_host()),
                port: env_parse("REDIS_PORT", default_single_port())?,
                password: env_opt("REDIS_PASSWORD"),
            },
            ..Self::default()
        };

        if let Ok(spec) = std::env::var("REDIS_CLUSTER_NODES") {
            config.nodes = parse_node_list(&spec)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.pool_size < 1 {
            return Err(CacheError::config("pool_size must be at least 1"));
        }
        if self.max_failures < 1 {
            return Err(CacheError::config("max_failures must be at least 1"));
        }
        if self.key_prefix.is_empty() {
            return Err(CacheError::config("key_prefix must not be empty"));
        }
        Ok(())
    }
}

/// Parse a `"host1:port1,host2:port2"` list, rejecting malformed entries
/// instead of silently dropping them.
pub fn parse_node_list(spec: &str) -> crate::error::Result<Vec<NodeAddress>> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NodeAddress::from_str)
        .collect()
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            if default {
                !v.eq_ignore_ascii_case("false")
            } else {
                v.eq_ignore_ascii_case("true")
            }
        }
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> crate::error::Result<T> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| CacheError::config(format!("{} has invalid value '{}'", name, v))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_list() {
        let nodes = parse_node_list("redis-1:6379, redis-2:6380").unwrap();
        assert_eq!(
            nodes,
            vec![
                NodeAddress::new("redis-1", 6379),
                NodeAddress::new("redis-2", 6380),
            ]
        );
    }

    #[test]
    fn rejects_malformed_node_spec() {
        assert!(parse_node_list("redis-1").is_err());
        assert!(parse_node_list("redis-1:notaport").is_err());
        assert!(parse_node_list(":6379").is_err());
    }

    #[test]
    fn ipv6_style_addresses_use_last_colon() {
        let node = NodeAddress::from_str("::1:6379").unwrap();
        assert_eq!(node.host, "::1");
        assert_eq!(node.port, 6379);
    }

    #[test]
    fn defaults_match_platform_conventions() {
        let config = ClusterConfig::default();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.key_prefix, "pitchey");
        assert!(config.fallback_to_single);
    }

    #[test]
    fn validate_rejects_zero_pool() {
        let config = ClusterConfig {
            pool_size: 0,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
