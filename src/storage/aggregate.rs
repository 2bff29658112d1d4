//! Daily roll-up of raw events
//!
//! Raw rows are counted into three independent bucket maps, which are then
//! merged into their tables with insert-or-increment upserts.

use anyhow::anyhow;
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;

use crate::models::{Day, DeviceBucket, EventRow, PageBucket, RegionBucket};
use crate::storage::StorageResult;

const UPSERT_PAGE: &str = r#"
    INSERT INTO daily_pages (year, month, day, host, path, method, count)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (year, month, day, host, path, method)
        DO UPDATE SET count = count + excluded.count
"#;

const UPSERT_REGION: &str = r#"
    INSERT INTO daily_regions (year, month, day, host, region, count)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT (year, month, day, host, region)
        DO UPDATE SET count = count + excluded.count
"#;

const UPSERT_DEVICE: &str = r#"
    INSERT INTO daily_devices (year, month, day, host, device, os, browser, count)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (year, month, day, host, device, os, browser)
        DO UPDATE SET count = count + excluded.count
"#;

/// In-memory counts for one aggregation pass
#[derive(Debug, Default)]
pub struct DailyBuckets {
    pub pages: HashMap<PageBucket, i64>,
    pub regions: HashMap<RegionBucket, i64>,
    pub devices: HashMap<DeviceBucket, i64>,
    pub events: u64,
}

impl DailyBuckets {
    pub fn from_rows(rows: &[EventRow]) -> StorageResult<Self> {
        let mut buckets = Self::default();
        for row in rows {
            buckets.add(row)?;
        }
        Ok(buckets)
    }

    pub fn add(&mut self, row: &EventRow) -> StorageResult<()> {
        let day = Day::from_timestamp(row.timestamp)
            .ok_or_else(|| anyhow!("event timestamp {} is out of range", row.timestamp))?;

        *self
            .pages
            .entry(PageBucket {
                day,
                host: row.host.clone(),
                path: row.path.clone(),
                method: row.method.clone(),
            })
            .or_insert(0) += 1;

        *self
            .regions
            .entry(RegionBucket {
                day,
                host: row.host.clone(),
                region: row.region.clone(),
            })
            .or_insert(0) += 1;

        *self
            .devices
            .entry(DeviceBucket {
                day,
                host: row.host.clone(),
                device: row.device.clone(),
                os: row.os.clone(),
                browser: row.browser.clone(),
            })
            .or_insert(0) += 1;

        self.events += 1;
        Ok(())
    }

    /// Merge every bucket into its table inside `tx`
    pub async fn apply(&self, tx: &mut Transaction<'_, Sqlite>) -> StorageResult<()> {
        for (bucket, count) in &self.pages {
            sqlx::query(UPSERT_PAGE)
                .bind(bucket.day.year)
                .bind(bucket.day.month)
                .bind(bucket.day.day)
                .bind(&bucket.host)
                .bind(&bucket.path)
                .bind(&bucket.method)
                .bind(count)
                .execute(&mut **tx)
                .await?;
        }

        for (bucket, count) in &self.regions {
            sqlx::query(UPSERT_REGION)
                .bind(bucket.day.year)
                .bind(bucket.day.month)
                .bind(bucket.day.day)
                .bind(&bucket.host)
                .bind(&bucket.region)
                .bind(count)
                .execute(&mut **tx)
                .await?;
        }

        for (bucket, count) in &self.devices {
            sqlx::query(UPSERT_DEVICE)
                .bind(bucket.day.year)
                .bind(bucket.day.month)
                .bind(bucket.day.day)
                .bind(&bucket.host)
                .bind(&bucket.device)
                .bind(&bucket.os)
                .bind(&bucket.browser)
                .bind(count)
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }
}
