//! End-to-end ingestion: log file -> follower -> assembler -> batcher -> store.

use chrono::{TimeZone, Utc};
use nalax::analytics::GeoResolver;
use nalax::ingest::{
    BatchConfig, Batcher, EventAssembler, FollowConfig, LogFollower, Pipeline,
};
use nalax::models::{Agent, Browser, DailyPage, Device, Network, Os};
use nalax::storage::{SqliteStorage, Storage};
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const EDGE_LINE: &str = r#"{"time":"2023-05-01T00:00:00Z","uri":"/index.html?x=1","method":"GET","status":"200","remote":"174.160.149.129","agent":"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36 Edg/112.0.1722.71","host":"example.com"}"#;

fn geo() -> Arc<GeoResolver> {
    let table = format!(
        "{}\t{}\tUS\n{}\t{}\tJP\n",
        u32::from(Ipv4Addr::new(174, 160, 0, 0)),
        u32::from(Ipv4Addr::new(174, 160, 255, 255)),
        u32::from(Ipv4Addr::new(1, 0, 16, 0)),
        u32::from(Ipv4Addr::new(1, 0, 31, 255)),
    );
    Arc::new(GeoResolver::from_table(&table, 64).unwrap())
}

async fn create_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.migrate().await.unwrap();
    Arc::new(storage)
}

#[tokio::test]
async fn test_line_to_daily_page() {
    let storage = create_storage().await;
    let assembler = EventAssembler::new(geo());

    let event = assembler.assemble_line(EDGE_LINE).unwrap();
    assert_eq!(event.path, "/index.html");
    assert_eq!(event.region, "US");
    assert_eq!(event.network, Network::Ipv4);
    assert_eq!(
        event.agent,
        Agent::new(Device::Desktop, Os::Windows, Browser::Edge)
    );

    storage.insert_events(&[event]).await.unwrap();
    let cutoff = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 1).unwrap();
    assert_eq!(storage.aggregate(cutoff).await.unwrap(), 1);

    let pages = storage.top_pages(10).await.unwrap();
    assert_eq!(
        pages,
        vec![DailyPage {
            year: 2023,
            month: 5,
            day: 1,
            host: "example.com".to_string(),
            path: "/index.html".to_string(),
            method: "GET".to_string(),
            count: 1,
        }]
    );
}

#[tokio::test]
async fn test_pipeline_stores_file_contents() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{EDGE_LINE}").unwrap();
    writeln!(file, "not json at all").unwrap();
    writeln!(
        file,
        r#"{{"time":"2023-05-01T10:00:00Z","uri":"/about","method":"GET","status":"200","remote":"1.0.16.1","agent":"curl/8.0","host":"example.com"}}"#
    )
    .unwrap();
    writeln!(
        file,
        r#"{{"time":"never","uri":"/","method":"GET","status":"200","remote":"1.0.16.1","agent":"","host":"example.com"}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let storage = create_storage().await;
    let follower = LogFollower::new(
        file.path(),
        FollowConfig {
            command: Some(vec!["cat".to_string()]),
            ..Default::default()
        },
    );
    let mut handle = follower.follow().unwrap();

    // Size threshold above the record count: everything lands in the final flush.
    let batcher = Batcher::new(
        Arc::clone(&storage),
        BatchConfig::new(100, Duration::from_secs(60)),
    );
    let mut pipeline = Pipeline::new(EventAssembler::new(geo()), batcher);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats = pipeline.run(&mut handle, shutdown_rx).await.unwrap();
    assert_eq!(stats.lines, 4);
    assert_eq!(stats.events, 2);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.assemble_failures, 1);
    assert_eq!(stats.flushed, 2);
    assert!(pipeline.batcher().is_empty());

    assert_eq!(storage.count_events().await.unwrap(), 2);
    let cutoff = Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).unwrap();
    assert_eq!(storage.aggregate(cutoff).await.unwrap(), 2);

    let mut regions: Vec<(String, i64)> = storage
        .top_regions(10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.region, r.count))
        .collect();
    regions.sort();
    assert_eq!(
        regions,
        vec![("JP".to_string(), 1), ("US".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_shutdown_flushes_pending_events() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{EDGE_LINE}").unwrap();
    file.flush().unwrap();

    let storage = create_storage().await;
    let follower = LogFollower::new(
        file.path(),
        FollowConfig {
            from_start: true,
            grace_period: Duration::from_millis(200),
            ..Default::default()
        },
    );
    let mut handle = follower.follow().unwrap();

    let batcher = Batcher::new(Arc::clone(&storage), BatchConfig::new(100, Duration::ZERO));
    let mut pipeline = Pipeline::new(EventAssembler::new(geo()), batcher);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trigger = tokio::spawn(async move {
        // tail keeps running after replaying the file, so only a signal ends the run
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = shutdown_tx.send(true);
    });

    let stats = tokio::time::timeout(
        Duration::from_secs(15),
        pipeline.run(&mut handle, shutdown_rx),
    )
    .await
    .unwrap()
    .unwrap();
    trigger.await.unwrap();

    assert_eq!(stats.events, 1);
    assert_eq!(storage.count_events().await.unwrap(), 1);
}

#[tokio::test]
async fn test_idle_log_flushes_when_window_elapses() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{EDGE_LINE}").unwrap();
    file.flush().unwrap();

    let storage = create_storage().await;
    let follower = LogFollower::new(
        file.path(),
        FollowConfig {
            from_start: true,
            grace_period: Duration::from_millis(200),
            ..Default::default()
        },
    );
    let mut handle = follower.follow().unwrap();

    // Size threshold is never reached; only the one-second window can flush.
    let batcher = Batcher::new(
        Arc::clone(&storage),
        BatchConfig::new(100, Duration::from_secs(1)),
    );
    let mut pipeline = Pipeline::new(EventAssembler::new(geo()), batcher);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let observer = Arc::clone(&storage);
    let checker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let stored = observer.count_events().await.unwrap();
        let _ = shutdown_tx.send(true);
        stored
    });

    let stats = tokio::time::timeout(
        Duration::from_secs(15),
        pipeline.run(&mut handle, shutdown_rx),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(checker.await.unwrap(), 1, "window flush should precede shutdown");
    assert_eq!(stats.events, 1);
    assert_eq!(stats.flushed, 1);
    assert_eq!(storage.count_events().await.unwrap(), 1);
}
