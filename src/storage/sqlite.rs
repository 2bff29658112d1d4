use crate::models::{DailyDevice, DailyPage, DailyRegion, Event, EventRow};
use crate::storage::aggregate::DailyBuckets;
use crate::storage::schema::{self, MIGRATIONS};
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

// Ten bound columns per row keeps each statement well under SQLite's parameter limit.
const INSERT_CHUNK_ROWS: usize = 500;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn migrate(&self) -> StorageResult<i64> {
        schema::validate(MIGRATIONS)?;

        let mut current = self.schema_version().await?;
        let latest = schema::latest_version(MIGRATIONS);

        while current < latest {
            let version = current + 1;
            let step = &MIGRATIONS[version as usize];
            info!(version, description = step.description, "Applying schema step");

            let migration = |source: sqlx::Error| StorageError::Migration { version, source };
            let mut tx = self.pool.begin().await.map_err(migration)?;
            for statement in step.statements {
                debug!(version, statement = statement.trim(), "Executing schema statement");
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(migration)?;
            }
            sqlx::query(schema::RECORD_VERSION)
                .bind(version)
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(migration)?;
            tx.commit().await.map_err(migration)?;

            let recorded = self.schema_version().await?;
            if recorded < version {
                return Err(StorageError::InvalidMigrations(format!(
                    "schema version {version} was applied but not recorded"
                )));
            }
            current = recorded;
        }

        info!(version = current, "Database schema is up to date");
        Ok(current)
    }

    async fn schema_version(&self) -> StorageResult<i64> {
        let tracked = sqlx::query_scalar::<_, i64>(schema::SELECT_TRACKING_TABLE)
            .fetch_one(self.pool.as_ref())
            .await?;
        if tracked == 0 {
            return Ok(-1);
        }

        let version = sqlx::query_scalar::<_, Option<i64>>(schema::SELECT_VERSION)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(version.unwrap_or(-1))
    }

    async fn insert_events(&self, batch: &[Event]) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let rows: Vec<EventRow> = batch.iter().map(EventRow::from).collect();
        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO events (timestamp, host, path, method, status, region, network, device, os, browser) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.timestamp)
                    .push_bind(row.host.clone())
                    .push_bind(row.path.clone())
                    .push_bind(row.method.clone())
                    .push_bind(row.status)
                    .push_bind(row.region.clone())
                    .push_bind(row.network.clone())
                    .push_bind(row.device.clone())
                    .push_bind(row.os.clone())
                    .push_bind(row.browser.clone());
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(events = rows.len(), "Inserted events");
        Ok(())
    }

    async fn aggregate(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let threshold = cutoff.timestamp();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT timestamp, host, path, method, status, region, network, device, os, browser
            FROM events
            WHERE timestamp < ?
            "#,
        )
        .bind(threshold)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            debug!(cutoff = %cutoff, "No events older than cutoff");
            return Ok(0);
        }

        let buckets = DailyBuckets::from_rows(&rows)?;
        buckets.apply(&mut tx).await?;

        let purged = sqlx::query("DELETE FROM events WHERE timestamp < ?")
            .bind(threshold)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if purged != buckets.events {
            return Err(StorageError::Other(anyhow::anyhow!(
                "aggregated {} events but purge matched {purged}",
                buckets.events
            )));
        }

        tx.commit().await?;

        info!(
            cutoff = %cutoff,
            events = buckets.events,
            pages = buckets.pages.len(),
            regions = buckets.regions.len(),
            devices = buckets.devices.len(),
            "Aggregated daily events"
        );
        Ok(buckets.events)
    }

    async fn count_events(&self) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn top_pages(&self, limit: i64) -> StorageResult<Vec<DailyPage>> {
        let rows = sqlx::query_as::<_, DailyPage>(
            r#"
            SELECT year, month, day, host, path, method, count
            FROM daily_pages
            ORDER BY count DESC, year DESC, month DESC, day DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn top_regions(&self, limit: i64) -> StorageResult<Vec<DailyRegion>> {
        let rows = sqlx::query_as::<_, DailyRegion>(
            r#"
            SELECT year, month, day, host, region, count
            FROM daily_regions
            ORDER BY count DESC, year DESC, month DESC, day DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn top_devices(&self, limit: i64) -> StorageResult<Vec<DailyDevice>> {
        let rows = sqlx::query_as::<_, DailyDevice>(
            r#"
            SELECT year, month, day, host, device, os, browser, count
            FROM daily_devices
            ORDER BY count DESC, year DESC, month DESC, day DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }
}
