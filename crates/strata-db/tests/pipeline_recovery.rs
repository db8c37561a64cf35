//! Crash, retry, and resume behavior.
//!
//! Exercises the recovery contract end to end:
//! 1. A restarted pipeline resumes from the checkpointed offset and
//!    consumes only what arrived after it
//! 2. Redelivered changes land on per-key floors instead of applying
//!    twice
//! 3. Transient fetch, commit, and checkpoint failures are retried and
//!    heal without duplicating rows
//! 4. `reset_table` rebuilds a table from offset zero
//! 5. Continuous scheduling drains appended changes until shut down

use std::sync::Arc;
use std::time::Duration;

use strata_connectors::testing::FlakySource;
use strata_connectors::{MemorySource, SourceError};
use strata_core::config::MergeConfig;
use strata_core::event::{Key, RawChange, Row};
use strata_db::{DbError, Pipeline, PipelineOptions, ScheduleMode, TableSpec};
use strata_storage::testing::{FlakyCheckpointStore, FlakyVersionStore};
use strata_storage::{
    CheckpointStore, FileSystemCheckpointStore, InMemoryCheckpointStore, InMemoryVersionStore,
    VersionStore,
};

fn val(v: &str) -> Row {
    Row::new().with("val", serde_json::json!(v))
}

fn fast_retries() -> PipelineOptions {
    PipelineOptions {
        retry_backoff: Duration::from_millis(1),
        ..PipelineOptions::default()
    }
}

#[tokio::test]
async fn test_restart_resumes_from_checkpointed_offset() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn VersionStore> = Arc::new(InMemoryVersionStore::new());
    let old = vec![
        RawChange::upsert("A", 1, val("a1")),
        RawChange::upsert("B", 1, val("b1")),
    ];

    {
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(FileSystemCheckpointStore::new(dir.path(), 4));
        let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", old.clone())))
            .merge(MergeConfig::history())
            .store(Arc::clone(&store));
        let mut pipeline = Pipeline::new(vec![spec], checkpoints, PipelineOptions::default())
            .await
            .unwrap();
        pipeline.run_once().await.unwrap();
        assert_eq!(pipeline.committed_offset("items").unwrap().0, 2);
        pipeline.shutdown().await;
    }

    // The replacement process sees the feed grown by two changes.
    let mut grown = old;
    grown.push(RawChange::upsert("A", 2, val("a2")));
    grown.push(RawChange::upsert("C", 1, val("c1")));

    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileSystemCheckpointStore::new(dir.path(), 4));
    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", grown)))
        .merge(MergeConfig::history())
        .store(Arc::clone(&store));
    let mut pipeline = Pipeline::new(vec![spec], checkpoints, PipelineOptions::default())
        .await
        .unwrap();
    pipeline.run_once().await.unwrap();

    // Only the two new changes were fetched.
    assert_eq!(pipeline.counters().changes_applied, 2);
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 4);

    let a = pipeline.read_history("items", &Key::new("A")).unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(
        pipeline
            .read_current("items", &Key::new("C"))
            .unwrap()
            .unwrap()
            .payload
            .get("val"),
        Some(&serde_json::json!("c1"))
    );
}

#[tokio::test]
async fn test_lost_checkpoint_redelivery_does_not_double_apply() {
    let store: Arc<dyn VersionStore> = Arc::new(InMemoryVersionStore::new());
    let changes = vec![
        RawChange::upsert("A", 1, val("a1")),
        RawChange::upsert("A", 2, val("a2")),
        RawChange::delete("B", 3),
    ];

    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", changes.clone())))
        .merge(MergeConfig::history())
        .store(Arc::clone(&store));
    let mut first = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await
    .unwrap();
    first.run_once().await.unwrap();
    let settled = store.history_view();

    // Checkpoints are gone, so the whole feed is redelivered into the
    // surviving store.
    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", changes)))
        .merge(MergeConfig::history())
        .store(Arc::clone(&store));
    let mut second = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await
    .unwrap();
    second.run_once().await.unwrap();

    assert_eq!(store.history_view(), settled);
    let metrics = second.merge_metrics("items").unwrap();
    assert_eq!(metrics.rows_inserted, 0);
    assert_eq!(metrics.stale_skipped, 3);
}

#[tokio::test]
async fn test_transient_fetch_failures_retry_until_healthy() {
    let source = FlakySource::new(MemorySource::new(
        "feed",
        vec![RawChange::upsert("A", 1, val("x"))],
    ));
    source.fail_next_fetches(2);

    let spec = TableSpec::new("items", Box::new(source));
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        fast_retries(),
    )
    .await
    .unwrap();
    pipeline.run_once().await.unwrap();

    let counters = pipeline.counters();
    assert_eq!(counters.batch_retries, 2);
    assert_eq!(counters.batches_committed, 1);
    assert_eq!(counters.batches_failed, 0);
    assert!(pipeline
        .read_current("items", &Key::new("A"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_fetch_failures_surface_after_retry_budget() {
    let source = FlakySource::new(MemorySource::new(
        "feed",
        vec![RawChange::upsert("A", 1, val("x"))],
    ));
    source.fail_next_fetches(10);

    let spec = TableSpec::new("items", Box::new(source));
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions {
            max_batch_retries: 1,
            ..fast_retries()
        },
    )
    .await
    .unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    assert!(matches!(err, DbError::Source(SourceError::Unavailable(_))));

    let counters = pipeline.counters();
    assert_eq!(counters.batch_retries, 1);
    assert_eq!(counters.batches_failed, 1);
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 0);
}

#[tokio::test]
async fn test_partial_commit_heals_on_wholesale_retry() {
    let flaky = Arc::new(FlakyVersionStore::new());
    let changes = vec![
        RawChange::upsert("A", 1, val("a")),
        RawChange::upsert("B", 1, val("b")),
        RawChange::upsert("C", 1, val("c")),
        RawChange::upsert("D", 1, val("d")),
    ];
    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", changes)))
        .merge(MergeConfig::history())
        .store(Arc::clone(&flaky) as Arc<dyn VersionStore>);
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        fast_retries(),
    )
    .await
    .unwrap();

    // Exactly one of the four parallel commits fails; the rest land.
    // The batch retries wholesale and the refetched survivors are
    // skipped as stale.
    flaky.fail_next_commits(1);
    pipeline.run_once().await.unwrap();

    let counters = pipeline.counters();
    assert_eq!(counters.batch_retries, 1);
    assert_eq!(counters.batches_committed, 1);
    assert_eq!(counters.changes_applied, 4);

    let history = pipeline.history_view("items").unwrap();
    assert_eq!(history.len(), 4);
    for row in &history {
        assert_eq!(row.version_id, 1);
        assert!(row.is_current);
    }

    // Every key inserted exactly once across both attempts; whatever
    // landed before the failure is skipped as stale on the retry.
    let metrics = pipeline.merge_metrics("items").unwrap();
    assert_eq!(metrics.rows_inserted, 4);
    assert!(metrics.stale_skipped <= 3);
}

#[tokio::test]
async fn test_checkpoint_save_retries_without_refetching() {
    let checkpoints = Arc::new(FlakyCheckpointStore::new());
    checkpoints.fail_next_saves(1);

    let spec = TableSpec::new(
        "items",
        Box::new(MemorySource::new(
            "feed",
            vec![RawChange::upsert("A", 1, val("x"))],
        )),
    );
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        fast_retries(),
    )
    .await
    .unwrap();
    pipeline.run_once().await.unwrap();

    let counters = pipeline.counters();
    assert_eq!(counters.batch_retries, 1);
    assert_eq!(counters.checkpoints_written, 1);
    assert_eq!(counters.batches_committed, 1);
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 1);

    // The apply itself ran once: no stale skips from a refetch.
    assert_eq!(pipeline.merge_metrics("items").unwrap().stale_skipped, 0);
}

#[tokio::test]
async fn test_reset_table_rebuilds_from_offset_zero() {
    let changes = vec![
        RawChange::upsert("A", 1, val("a1")),
        RawChange::upsert("A", 2, val("a2")),
    ];
    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", changes)))
        .merge(MergeConfig::history());
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await
    .unwrap();

    pipeline.run_once().await.unwrap();
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 2);
    assert_eq!(pipeline.read_history("items", &Key::new("A")).unwrap().len(), 2);

    pipeline.reset_table("items").await.unwrap();
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 0);
    assert!(pipeline.history_view("items").unwrap().is_empty());

    // The rebuild replays the full feed; version numbering starts over.
    pipeline.run_once().await.unwrap();
    let history = pipeline.read_history("items", &Key::new("A")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version_id, 1);
    assert_eq!(history[1].version_id, 2);
    assert_eq!(pipeline.counters().changes_applied, 4);
}

#[tokio::test]
async fn test_reset_table_rejects_unknown_table() {
    let spec = TableSpec::new("items", Box::new(MemorySource::new("feed", Vec::new())));
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await
    .unwrap();

    let err = pipeline.reset_table("nope").await.unwrap_err();
    assert!(matches!(err, DbError::TableNotFound(name) if name == "nope"));
}

#[tokio::test]
async fn test_continuous_mode_drains_appended_changes_until_shutdown() {
    let source = MemorySource::new("feed", vec![RawChange::upsert("A", 1, val("a1"))]);
    let feed = source.feed();
    let spec = TableSpec::new("items", Box::new(source)).merge(MergeConfig::history());
    let mut pipeline = Pipeline::new(
        vec![spec],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await
    .unwrap();
    let shutdown = pipeline.shutdown_handle();

    let runner = tokio::spawn(async move {
        let result = pipeline
            .run(ScheduleMode::Continuous {
                poll_interval: Duration::from_millis(2),
            })
            .await;
        (result, pipeline)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    feed.push(RawChange::upsert("B", 2, val("b1")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.notify_one();
    let (result, pipeline) = runner.await.unwrap();
    result.unwrap();

    let current = pipeline.current_view("items").unwrap();
    assert_eq!(current.len(), 2);
    assert_eq!(pipeline.committed_offset("items").unwrap().0, 2);
    assert!(pipeline.counters().batches_committed >= 2);

    pipeline.shutdown().await;
}
