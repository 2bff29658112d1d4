use crate::models::{DailyDevice, DailyPage, DailyRegion, Event};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("schema migration to version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid schema migrations: {0}")]
    InvalidMigrations(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Apply pending schema steps in order and return the resulting version
    async fn migrate(&self) -> StorageResult<i64>;

    /// Greatest applied schema version, or -1 for a fresh store
    async fn schema_version(&self) -> StorageResult<i64>;

    /// Insert a batch of events atomically
    async fn insert_events(&self, batch: &[Event]) -> StorageResult<()>;

    /// Roll raw events older than `cutoff` into the daily tables and purge them
    ///
    /// Returns the number of raw events processed.
    async fn aggregate(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    /// Number of raw events awaiting aggregation
    async fn count_events(&self) -> StorageResult<i64>;

    async fn top_pages(&self, limit: i64) -> StorageResult<Vec<DailyPage>>;

    async fn top_regions(&self, limit: i64) -> StorageResult<Vec<DailyRegion>>;

    async fn top_devices(&self, limit: i64) -> StorageResult<Vec<DailyDevice>>;
}
