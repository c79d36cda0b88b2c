//! Operational probe for the cache cluster.
//!
//! Reads the same `REDIS_*` environment the services use, so it inspects
//! exactly the cluster they would talk to.

use clap::{Parser, Subcommand};
use pitchey_cache::{logging, RedisCache};

#[derive(Parser)]
#[command(author, version, about = "Inspect and poke the pitchey cache cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print aggregate cluster statistics
    Stats,
    /// Print per-node diagnostics
    Info,
    /// Ping the cluster
    Ping,
    /// Fetch a key (prints JSON, or nothing on a miss)
    Get { key: String },
    /// Store a JSON value under a key
    Set {
        key: String,
        value: String,
        /// TTL in seconds; defaults to the configured CACHE_TTL
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete a key
    Del { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let cache = RedisCache::from_env()?;
    if !cache.initialize().await {
        anyhow::bail!("cache initialization failed; no node reachable");
    }

    match cli.command {
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.get_stats())?);
        }
        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&cache.cluster_info())?);
        }
        Commands::Ping => {
            if cache.ping().await {
                println!("PONG");
            } else {
                println!("no healthy node answered");
            }
        }
        Commands::Get { key } => {
            if let Some(value) = cache.get::<serde_json::Value>(&key).await {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        Commands::Set { key, value, ttl } => {
            // Accept raw JSON, or treat the argument as a plain string.
            let value: serde_json::Value =
                serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let stored = cache.set(&key, &value, ttl).await;
            println!("{}", if stored { "OK" } else { "FAILED" });
        }
        Commands::Del { key } => {
            let removed = cache.del(&key).await;
            println!("{}", if removed { "OK" } else { "NOT FOUND" });
        }
    }

    cache.disconnect().await;
    Ok(())
}
