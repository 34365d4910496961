//! # Watcher Cycle Integration Tests
//!
//! Drives whole poll cycles against an in-memory transport, a real SQLite
//! history in a temporary directory and recording event/alert sinks.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{eventually, record, target, FakeService, Harness, BAL01};
use lib_fetch::configs::ConfigError;
use lib_fetch::ingestors::route_checks;
use lib_fetch::{CycleReport, WatchError, Watcher};

const BTK: &str = "ftp://ftp.nhc.noaa.gov/atcf/btk/bal012024.dat";

#[tokio::test]
async fn first_sighting_archives_parses_records_and_publishes() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), BAL01.as_bytes());

    let watcher = Watcher::with_service(
        target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["^bal\\d+\\.dat$"], Some("atcf")),
        service.clone(),
        &h.ctx,
    )
    .unwrap();

    let report = watcher.watch().await.unwrap();
    assert_eq!(report, CycleReport { listed: 1, changed: 1, unchanged: 0, failed: 0 });

    let archived = h.dir.path().join("data/2024/12/atcf/btk/28-2107-bal012024.dat");
    assert_eq!(tokio::fs::read_to_string(&archived).await.unwrap(), BAL01);
    assert!(archived.with_extension("json").exists(), "parser sidecar missing");

    let latest = h.database.get_all_latest(&[record(BTK, None)]).await.unwrap();
    let row = latest[BTK].as_ref().expect("row written");
    assert_eq!(row.code.as_deref(), Some("ATCF.2024AL01"));
    assert_eq!(row.modified_on, Some(1_735_420_020_000));
    assert_eq!(row.save_path, archived.display().to_string());

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    let (cmd, data) = &events[0];
    let data = data.as_ref().unwrap();
    assert_eq!(cmd, "new");
    assert_eq!(data["code"], "ATCF.2024AL01");
    assert_eq!(data["parser"], "atcf");
    assert_eq!(data["file"]["href"], BTK);
    assert_eq!(data["savePath"], archived.display().to_string());
    assert_eq!(data["json"]["basin"], "AL");
}

#[tokio::test]
async fn unchanged_listing_downloads_nothing() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), BAL01.as_bytes());
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), service.clone(), &h.ctx).unwrap();

    watcher.watch().await.unwrap();
    let report = watcher.watch().await.unwrap();

    assert_eq!(report, CycleReport { listed: 1, changed: 0, unchanged: 1, failed: 0 });
    assert_eq!(service.download_count(), 1);
    assert_eq!(h.sink.events().len(), 1);
}

#[tokio::test]
async fn newer_timestamp_is_fetched_again() {
    let h = Harness::new().await;
    let service = FakeService::new();
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), service.clone(), &h.ctx).unwrap();

    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), b"v1");
    watcher.watch().await.unwrap();
    service.publish(record(BTK, Some("2024-12-28T23:07:00Z")), b"v2");
    let report = watcher.watch().await.unwrap();

    assert_eq!(report.changed, 1);
    let latest = h.database.get_all_latest(&[record(BTK, None)]).await.unwrap();
    let row = latest[BTK].as_ref().unwrap();
    assert!(row.save_path.ends_with("28-2307-bal012024.dat"));
    // Both versions stay archived.
    assert!(h.dir.path().join("data/2024/12/atcf/btk/28-2107-bal012024.dat").exists());
}

#[tokio::test]
async fn files_without_timestamp_are_fetched_once() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.publish(record("https://www.nhc.noaa.gov/index-at.xml", None), b"<rss/>");
    let watcher = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["index-at.xml"], None), service.clone(), &h.ctx).unwrap();

    assert_eq!(watcher.watch().await.unwrap().changed, 1);
    assert_eq!(watcher.watch().await.unwrap().unchanged, 1);
    assert_eq!(service.download_count(), 1);
}

#[tokio::test]
async fn vanished_timestamp_does_not_refetch() {
    let h = Harness::new().await;
    let service = FakeService::new();
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), service.clone(), &h.ctx).unwrap();

    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), b"v1");
    let mut changed = vec![watcher.watch().await.unwrap().changed];
    service.publish(record(BTK, None), b"v1");
    for _ in 0..3 {
        changed.push(watcher.watch().await.unwrap().changed);
    }

    assert_eq!(changed, [1, 0, 0, 0]);
    assert_eq!(service.download_count(), 1);
    assert_eq!(h.sink.events().len(), 1);
    let latest = h.database.get_all_latest(&[record(BTK, None)]).await.unwrap();
    assert_eq!(latest[BTK].as_ref().unwrap().modified_on, Some(1_735_420_020_000));

    // A timestamp showing up again is compared as usual.
    service.publish(record(BTK, Some("2024-12-29T03:00:00Z")), b"v2");
    assert_eq!(watcher.watch().await.unwrap().changed, 1);
}

#[tokio::test]
async fn escaped_names_are_archived_under_remote_names() {
    let h = Harness::new().await;
    let service = FakeService::new();
    let href = "ftp://ftp.nhc.noaa.gov/atcf/btk/storm%20report%231.txt";
    service.publish(record(href, Some("2024-12-28T21:07:00Z")), b"report");
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["report"], None), service.clone(), &h.ctx).unwrap();

    assert_eq!(watcher.watch().await.unwrap().changed, 1);
    let archived = h.dir.path().join("data/2024/12/atcf/btk/28-2107-storm report#1.txt");
    assert_eq!(tokio::fs::read(&archived).await.unwrap(), b"report");
}

#[tokio::test]
async fn parse_failure_writes_no_row_and_is_retried() {
    let h = Harness::new().await;
    let service = FakeService::new();
    let href = "https://www.nhc.noaa.gov/CurrentStorms.json";
    service.publish(record(href, Some("2025-08-01T10:00:00Z")), b"{truncated");
    let watcher = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["CurrentStorms.json"], Some("json")), service.clone(), &h.ctx).unwrap();

    let report = watcher.watch().await.unwrap();
    assert_eq!(report, CycleReport { listed: 1, changed: 0, unchanged: 0, failed: 1 });
    assert!(h.database.get_all_latest(&[record(href, None)]).await.unwrap()[href].is_none());
    assert_eq!(h.notifier.count(), 1);
    assert!(h.sink.events().is_empty());

    // Same listing, repaired file: the next cycle picks it up.
    service.publish(record(href, Some("2025-08-01T10:00:00Z")), br#"{"activeStorms": []}"#);
    let report = watcher.watch().await.unwrap();
    assert_eq!(report.changed, 1);
    let latest = h.database.get_all_latest(&[record(href, None)]).await.unwrap();
    assert_eq!(latest[href].as_ref().unwrap().code.as_deref(), Some("JSON.01-1000-CurrentStorms"));
}

#[tokio::test]
async fn failed_download_does_not_stop_the_batch() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.list_without_contents(record("ftp://ftp.nhc.noaa.gov/atcf/btk/bal022024.dat", Some("2024-07-01T00:00:00Z")));
    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), BAL01.as_bytes());
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), service.clone(), &h.ctx).unwrap();

    let report = watcher.watch().await.unwrap();
    assert_eq!(report, CycleReport { listed: 2, changed: 1, unchanged: 0, failed: 1 });
    assert_eq!(service.download_count(), 2);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn listing_failure_ends_cycle_and_alerts() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.fail_listing.store(true, Ordering::SeqCst);
    let watcher = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["a"], None), service.clone(), &h.ctx).unwrap();

    assert!(matches!(watcher.watch().await, Err(WatchError::Transport(_))));
    assert_eq!(h.notifier.count(), 1);
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn database_failure_ends_cycle() {
    let h = Harness::new().await;
    let service = FakeService::new();
    service.publish(record(BTK, Some("2024-12-28T21:07:00Z")), BAL01.as_bytes());
    let watcher = Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), service.clone(), &h.ctx).unwrap();

    h.database.end().await.unwrap();
    assert!(matches!(watcher.watch().await, Err(WatchError::Persistence(_))));
    assert_eq!(service.download_count(), 0);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let h = Harness::new().await;
    let service = FakeService::gated();
    let watcher = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["a"], None), service.clone(), &h.ctx).unwrap();

    assert!(watcher.trigger());
    assert!(watcher.is_running());
    assert!(!watcher.trigger(), "second cycle must not start while the first runs");
    assert!(matches!(watcher.watch().await, Err(WatchError::Busy)));

    service.release();
    assert!(watcher.shutdown(Duration::from_millis(20), 100).await);
    assert!(!watcher.trigger(), "no cycles after shutdown");
}

#[tokio::test]
async fn shutdown_gives_up_on_a_stuck_cycle() {
    let h = Harness::new().await;
    let service = FakeService::gated();
    let watcher = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["a"], None), service.clone(), &h.ctx).unwrap();

    watcher.schedule();
    assert!(eventually(|| watcher.is_running()).await);
    assert!(!watcher.shutdown(Duration::from_millis(5), 3).await);

    service.release();
    assert!(eventually(|| !watcher.is_running()).await);
}

#[tokio::test]
async fn check_requests_trigger_every_watcher() {
    let h = Harness::new().await;
    let first = FakeService::new();
    first.publish(record(BTK, Some("2024-12-28T21:07:00Z")), b"one");
    let second = FakeService::new();
    second.publish(record("https://www.nhc.noaa.gov/index-at.xml", None), b"two");

    let watchers = vec![
        Arc::new(Watcher::with_service(target("ftp://ftp.nhc.noaa.gov/atcf", "btk", &["bal"], None), first.clone(), &h.ctx).unwrap()),
        Arc::new(Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["index-at.xml"], None), second.clone(), &h.ctx).unwrap()),
    ];

    let (tx, rx) = mpsc::channel(1);
    let router = route_checks(watchers.clone(), rx);
    tx.send(()).await.unwrap();

    assert!(eventually(|| h.sink.events().len() == 2).await);
    assert_eq!((first.download_count(), second.download_count()), (1, 1));

    drop(tx);
    router.await.unwrap();
}

#[tokio::test]
async fn unknown_parser_is_rejected_at_construction() {
    let h = Harness::new().await;
    let result = Watcher::with_service(target("https://www.nhc.noaa.gov", "", &["a"], Some("grib")), FakeService::new(), &h.ctx);
    assert!(matches!(result, Err(ConfigError::UnknownParser { .. })));
}
