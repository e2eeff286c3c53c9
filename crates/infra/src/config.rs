//! Environment-backed configuration.
//!
//! Everything is constructed from this at startup and injected explicitly;
//! no process-wide client handles.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::synchronizer::DEFAULT_KEY_PREFIX;
use crate::workers::ConsumerOptions;

/// Stream the product write path publishes to.
pub const DEFAULT_STREAM: &str = "sync:products";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Master Redis instance: log appends, cache writes, cursor writes.
    pub redis_master_url: String,
    /// Optional read replica for cache reads.
    pub redis_replica_url: Option<String>,
    /// Stream name the pipeline runs over.
    pub stream: String,
    /// Cache key namespace (`<prefix>:<product_id>`).
    pub cache_key_prefix: String,
    /// Persist the consumer cursor to Redis instead of replaying the whole
    /// stream on every restart.
    pub persist_cursor: bool,
    /// Producer publish queue capacity.
    pub publish_queue_capacity: usize,
    /// Consumer loop tuning.
    pub consumer: ConsumerOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let redis_master_url = lookup("REDIS_MASTER_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("REDIS_MASTER_URL"))?;
        let redis_replica_url = lookup("REDIS_REPLICA_URL").filter(|v| !v.is_empty());

        let stream = lookup("SYNC_STREAM")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_STREAM.to_owned());
        let cache_key_prefix = lookup("CACHE_KEY_PREFIX")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_owned());

        let persist_cursor = parse_bool("PERSIST_CURSOR", lookup("PERSIST_CURSOR"))?;
        let publish_queue_capacity = parse_number(
            "PUBLISH_QUEUE_CAPACITY",
            lookup("PUBLISH_QUEUE_CAPACITY"),
            crate::producer::DEFAULT_QUEUE_CAPACITY as u64,
        )? as usize;

        let defaults = ConsumerOptions::default();
        let block = Duration::from_millis(parse_number(
            "CONSUMER_BLOCK_MS",
            lookup("CONSUMER_BLOCK_MS"),
            defaults.block.as_millis() as u64,
        )?);
        let consumer = ConsumerOptions {
            batch_size: parse_number(
                "CONSUMER_BATCH_SIZE",
                lookup("CONSUMER_BATCH_SIZE"),
                defaults.batch_size as u64,
            )? as usize,
            read_timeout: block + Duration::from_secs(1),
            block,
            backoff: Duration::from_millis(parse_number(
                "CONSUMER_BACKOFF_MS",
                lookup("CONSUMER_BACKOFF_MS"),
                defaults.backoff.as_millis() as u64,
            )?),
            heartbeat: Duration::from_secs(parse_number(
                "CONSUMER_HEARTBEAT_SECS",
                lookup("CONSUMER_HEARTBEAT_SECS"),
                defaults.heartbeat.as_secs(),
            )?),
        };

        Ok(Self {
            redis_master_url,
            redis_replica_url,
            stream,
            cache_key_prefix,
            persist_cursor,
            publish_queue_capacity,
            consumer,
        })
    }
}

fn parse_number(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            name,
            value: raw,
            reason: format!("{e}"),
        }),
    }
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref() {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            value: other.to_owned(),
            reason: "expected a boolean".to_owned(),
        }),
    }
}
