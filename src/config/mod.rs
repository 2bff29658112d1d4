use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{BatchConfig, FollowConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub geo: GeoConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Path to the `start end region` range table
    pub table_path: String,
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Flush once this many events are pending (0 disables)
    pub buffer_size: usize,
    /// Flush once the oldest window is this old (0 disables)
    pub buffer_time_secs: u64,
    pub grace_period_secs: u64,
    pub channel_capacity: usize,
}

impl IngestConfig {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::new(self.buffer_size, Duration::from_secs(self.buffer_time_secs))
    }

    pub fn follow_config(&self, from_start: bool) -> FollowConfig {
        FollowConfig {
            from_start,
            grace_period: Duration::from_secs(self.grace_period_secs),
            channel_capacity: self.channel_capacity,
            command: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./nalax.db".to_string(),
                max_connections: 5,
            },
            geo: GeoConfig {
                table_path: "./ip2country-v4-u32.tsv".to_string(),
                cache_capacity: crate::analytics::DEFAULT_CACHE_CAPACITY,
            },
            ingest: IngestConfig {
                buffer_size: 100,
                buffer_time_secs: 5,
                grace_period_secs: 2,
                channel_capacity: 1024,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let database_url = lookup("DATABASE_URL").unwrap_or(defaults.database.url);
        let max_connections = parse_var(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database.max_connections,
        )?;

        let table_path = lookup("GEO_TABLE_PATH").unwrap_or(defaults.geo.table_path);
        let cache_capacity =
            parse_var(&lookup, "GEO_CACHE_CAPACITY", defaults.geo.cache_capacity)?;

        let buffer_size = parse_var(&lookup, "BUFFER_SIZE", defaults.ingest.buffer_size)?;
        let buffer_time_secs =
            parse_var(&lookup, "BUFFER_TIME_SECS", defaults.ingest.buffer_time_secs)?;
        let grace_period_secs = parse_var(
            &lookup,
            "FOLLOW_GRACE_PERIOD_SECS",
            defaults.ingest.grace_period_secs,
        )?;
        let channel_capacity = parse_var(
            &lookup,
            "FOLLOW_CHANNEL_CAPACITY",
            defaults.ingest.channel_capacity,
        )?;

        if max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            geo: GeoConfig {
                table_path,
                cache_capacity,
            },
            ingest: IngestConfig {
                buffer_size,
                buffer_time_secs,
                grace_period_secs,
                channel_capacity,
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'")),
        None => Ok(default),
    }
}
