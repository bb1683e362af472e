//! Watch mode: snapshot rows land in SQLite, retention pruning runs each
//! cycle, and cancellation stops the loop cleanly.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use praetor::config::{ApprovalMode, PraetorConfig};
use praetor::scheduler::{CycleSnapshot, WatchScheduler, WatchStore};

fn watch_config(data_dir: &std::path::Path) -> PraetorConfig {
    let mut config = PraetorConfig::default();
    config.data_dir = data_dir.to_path_buf();
    config.approval.mode = ApprovalMode::Allow;
    config.metrics.backend = "none".to_string();
    config.scanner.simulate = true;
    config.scanner.simulate_delay_ms = 0;
    config.audit.sync_each_record = false;
    config.watch.interval_secs = 3600;
    config.watch.max_cycles = Some(1);
    config
}

#[tokio::test]
async fn single_cycle_records_one_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = watch_config(dir.path());
    let db_path = config.watch_db_path();

    let scenario = praetor::scenario::lookup("ransomware").unwrap();
    let cycles = WatchScheduler::new(config, Some(scenario)).run().await.unwrap();
    assert_eq!(cycles, 1);

    let store = WatchStore::open(&db_path).await.unwrap();
    let rows = store.snapshots().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cycle, 1);
    assert_eq!(rows[0].scenario.as_deref(), Some("ransomware"));
    assert_eq!(rows[0].severity.as_deref(), Some("critical"));
    assert!(rows[0].findings > 0);
    assert_eq!(rows[0].status, "completed");
    store.close().await;
}

#[tokio::test]
async fn retention_prunes_expired_rows_during_a_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = watch_config(dir.path());
    config.watch.retention_days = 30;
    let db_path = config.watch_db_path();

    // Seed a row well past the retention window.
    let store = WatchStore::open(&db_path).await.unwrap();
    store
        .record(&CycleSnapshot {
            cycle: 99,
            run_id: "stale".to_string(),
            scenario: Some("cryptomining".to_string()),
            severity: Some("medium".to_string()),
            findings: 2,
            status: "completed".to_string(),
            created_at: (Utc::now() - chrono::Duration::days(90)).to_rfc3339(),
        })
        .await
        .unwrap();
    store.close().await;

    let scenario = praetor::scenario::lookup("cryptomining").unwrap();
    let cycles = WatchScheduler::new(config, Some(scenario)).run().await.unwrap();
    assert_eq!(cycles, 1);

    let store = WatchStore::open(&db_path).await.unwrap();
    let rows = store.snapshots().await.unwrap();
    assert_eq!(rows.len(), 1, "stale row must be pruned");
    assert_eq!(rows[0].cycle, 1);
    store.close().await;
}

#[tokio::test]
async fn cancellation_before_first_tick_runs_no_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = watch_config(dir.path());
    config.watch.max_cycles = Some(10);
    let db_path = config.watch_db_path();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let cycles = WatchScheduler::new(config, None)
        .with_cancel(cancel)
        .run()
        .await
        .unwrap();
    assert_eq!(cycles, 0);

    let store = WatchStore::open(&db_path).await.unwrap();
    assert!(store.snapshots().await.unwrap().is_empty());
    store.close().await;
}
