//! Integration tests for the SQLite store: schema migration, atomic batch
//! insertion, and the aggregate-and-purge pass.

use chrono::{DateTime, TimeZone, Utc};
use nalax::models::{Agent, Browser, Device, Event, Network, Os};
use nalax::storage::{SqliteStorage, Storage, MIGRATIONS};
use std::sync::Arc;

/// In-memory databases are per connection, so the pool is pinned to one.
async fn create_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.migrate().await.unwrap();
    Arc::new(storage)
}

fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

fn event(timestamp: DateTime<Utc>, path: &str, region: &str) -> Event {
    Event {
        timestamp,
        host: "example.com".to_string(),
        path: path.to_string(),
        method: "GET".to_string(),
        status: 200,
        region: region.to_string(),
        network: Network::Ipv4,
        agent: Agent::new(Device::Desktop, Os::Linux, Browser::Firefox),
    }
}

#[tokio::test]
async fn test_fresh_store_reports_no_version() {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    assert_eq!(storage.schema_version().await.unwrap(), -1);
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let storage = create_storage().await;
    let latest = MIGRATIONS.len() as i64 - 1;
    assert_eq!(storage.schema_version().await.unwrap(), latest);

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(storage.pool())
        .await
        .unwrap();

    assert_eq!(storage.migrate().await.unwrap(), latest);

    let recorded_again: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(storage.pool())
        .await
        .unwrap();
    assert_eq!(recorded, recorded_again);
    assert_eq!(recorded, MIGRATIONS.len() as i64);
}

#[tokio::test]
async fn test_migrate_resumes_after_unrecorded_step() {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();

    // Version 0 and part of version 1 were applied, but 1 was never recorded.
    for statement in MIGRATIONS[0].statements {
        sqlx::query(statement).execute(storage.pool()).await.unwrap();
    }
    sqlx::query("INSERT INTO schema_version (version, timestamp) VALUES (0, 0)")
        .execute(storage.pool())
        .await
        .unwrap();
    sqlx::query(MIGRATIONS[1].statements[0])
        .execute(storage.pool())
        .await
        .unwrap();

    assert_eq!(storage.schema_version().await.unwrap(), 0);
    let version = storage.migrate().await.unwrap();
    assert_eq!(version, MIGRATIONS.len() as i64 - 1);
    assert_eq!(storage.count_events().await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_batch_is_visible_at_once() {
    let storage = create_storage().await;

    let batch: Vec<Event> = (0..1200)
        .map(|i| event(at(2023, 5, 1, 0), &format!("/page/{}", i % 7), "US"))
        .collect();
    storage.insert_events(&batch).await.unwrap();
    assert_eq!(storage.count_events().await.unwrap(), 1200);

    storage.insert_events(&[]).await.unwrap();
    assert_eq!(storage.count_events().await.unwrap(), 1200);
}

#[tokio::test]
async fn test_aggregate_then_repeat_is_noop() {
    let storage = create_storage().await;
    let batch: Vec<Event> = (0..5).map(|_| event(at(2023, 5, 1, 3), "/", "US")).collect();
    storage.insert_events(&batch).await.unwrap();

    let cutoff = at(2023, 5, 2, 0);
    assert_eq!(storage.aggregate(cutoff).await.unwrap(), 5);
    assert_eq!(storage.count_events().await.unwrap(), 0);

    let pages = storage.top_pages(10).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].count, 5);

    assert_eq!(storage.aggregate(cutoff).await.unwrap(), 0);
    assert_eq!(storage.aggregate(at(2023, 5, 1, 0)).await.unwrap(), 0);
    assert_eq!(storage.top_pages(10).await.unwrap()[0].count, 5);
}

#[tokio::test]
async fn test_aggregate_accumulates_into_existing_buckets() {
    let storage = create_storage().await;

    storage
        .insert_events(&[event(at(2023, 5, 1, 1), "/", "US"), event(at(2023, 5, 1, 2), "/", "US")])
        .await
        .unwrap();
    assert_eq!(storage.aggregate(at(2023, 5, 1, 12)).await.unwrap(), 2);

    storage
        .insert_events(&[
            event(at(2023, 5, 1, 13), "/", "US"),
            event(at(2023, 5, 1, 14), "/", "US"),
            event(at(2023, 5, 1, 15), "/", "US"),
        ])
        .await
        .unwrap();
    assert_eq!(storage.aggregate(at(2023, 5, 2, 0)).await.unwrap(), 3);

    let pages = storage.top_pages(10).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].count, 5);

    let regions = storage.top_regions(10).await.unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].region, "US");
    assert_eq!(regions[0].count, 5);

    let devices = storage.top_devices(10).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(
        (devices[0].device.as_str(), devices[0].os.as_str(), devices[0].browser.as_str()),
        ("desktop", "linux", "firefox")
    );
    assert_eq!(devices[0].count, 5);
}

#[tokio::test]
async fn test_aggregate_only_purges_events_before_cutoff() {
    let storage = create_storage().await;
    storage
        .insert_events(&[
            event(at(2023, 5, 1, 10), "/old", "US"),
            event(at(2023, 5, 3, 10), "/new", "US"),
        ])
        .await
        .unwrap();

    // Strictly-less-than: an event exactly at the cutoff stays raw.
    assert_eq!(storage.aggregate(at(2023, 5, 3, 10)).await.unwrap(), 1);
    assert_eq!(storage.count_events().await.unwrap(), 1);

    let pages = storage.top_pages(10).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].path, "/old");
    assert_eq!((pages[0].year, pages[0].month, pages[0].day), (2023, 5, 1));
}

#[tokio::test]
async fn test_top_rows_ordered_by_count() {
    let storage = create_storage().await;
    let mut batch = Vec::new();
    for (region, n) in [("JP", 1), ("US", 4), ("DE", 2)] {
        for _ in 0..n {
            batch.push(event(at(2023, 5, 1, 8), "/", region));
        }
    }
    storage.insert_events(&batch).await.unwrap();
    storage.aggregate(at(2023, 5, 2, 0)).await.unwrap();

    let regions = storage.top_regions(2).await.unwrap();
    let ranked: Vec<(&str, i64)> = regions.iter().map(|r| (r.region.as_str(), r.count)).collect();
    assert_eq!(ranked, vec![("US", 4), ("DE", 2)]);
}

#[tokio::test]
async fn test_failed_aggregate_rolls_back() {
    let storage = create_storage().await;
    storage
        .insert_events(&[event(at(2023, 5, 1, 1), "/", "US"), event(at(2023, 5, 1, 2), "/a", "JP")])
        .await
        .unwrap();

    // Page and region upserts succeed; the device upsert then fails mid-transaction.
    sqlx::query("DROP TABLE daily_devices")
        .execute(storage.pool())
        .await
        .unwrap();

    assert!(storage.aggregate(at(2023, 5, 2, 0)).await.is_err());
    assert_eq!(storage.count_events().await.unwrap(), 2);
    assert!(storage.top_pages(10).await.unwrap().is_empty());
    assert!(storage.top_regions(10).await.unwrap().is_empty());
}
