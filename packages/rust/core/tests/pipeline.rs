mod common;

use std::sync::Arc;

use common::{Fixture, RecordingProgress, Source, mixed_batch, test_config};
use manualforge_core::CancellationToken;
use manualforge_shared::{PipelineConfig, RecordState, Stage, TrimPolicy};
use manualforge_storage::{ContentStore, RawCache, RecordStore};

#[tokio::test]
async fn mixed_batch_settles_every_record() {
    let fixture = Fixture::new(&mixed_batch()).await;
    let result = fixture.run(test_config(5)).await;

    assert_eq!(result.processed, 5);
    assert_eq!(result.rejected, 2);
    assert_eq!(result.failed, 3);
    assert_eq!(result.not_attempted, 0);
    assert!(!result.cancelled);
    assert_eq!(result.states.len(), 10);

    let failed_ids: Vec<i64> = result.errors.iter().map(|e| e.id).collect();
    assert_eq!(failed_ids, vec![8, 9, 10]);
    assert!(result.errors.iter().all(|e| e.stage == Stage::Fetch));
    assert!(result.errors[0].cause.contains("404"));

    // Every record is terminal in the store, and nothing is left pending.
    assert!(fixture.storage.list_pending().await.unwrap().is_empty());
    let counts = fixture.storage.count_by_state().await.unwrap();
    assert_eq!(counts[&RecordState::Processed], 5);
    assert_eq!(counts[&RecordState::Rejected], 2);
    assert_eq!(counts[&RecordState::Failed], 3);

    let failed = fixture.storage.get(8).await.unwrap().unwrap();
    assert!(failed.last_error().unwrap().starts_with("fetch: "));
    assert!(failed.content_ref().is_none());

    let rejected = fixture.storage.get(6).await.unwrap().unwrap();
    assert_eq!(rejected.extent(), Some(2));
    assert!(rejected.content_ref().is_none());
}

#[tokio::test]
async fn processed_text_is_trimmed_and_scrubbed() {
    let fixture = Fixture::new(&[(1, Source::Pages(5))]).await;
    fixture.run(test_config(1)).await;

    let record = fixture.storage.get(1).await.unwrap().unwrap();
    assert_eq!(record.state(), RecordState::Processed);
    assert_eq!(record.content_ref(), Some("Manual_1_(E1).txt"));
    assert_eq!(record.extent(), Some(5));

    let text = fixture.content.read("Manual_1_(E1).txt").unwrap();
    assert!(!text.contains("Cover"));
    assert!(!text.contains("Back"));
    assert!(!text.contains("AUTODOC"));
    assert!(text.contains("Step 2 of manual 1"));
    assert!(text.contains("Step 4 of manual 1"));
    assert_eq!(text, text.trim());
    assert_eq!(
        record.content_hash(),
        Some(manualforge_shared::content_hash(&text).as_str())
    );
}

#[tokio::test]
async fn rejected_records_skip_downstream_stages() {
    let fixture = Fixture::new(&mixed_batch()).await;
    let progress = Arc::new(RecordingProgress::default());
    let result = fixture
        .pipeline(test_config(3))
        .run_batch(&CancellationToken::new(), progress.clone())
        .await
        .unwrap();
    assert_eq!(result.rejected, 2);

    for id in [6, 7] {
        assert_eq!(progress.stages_for(id), vec![Stage::Fetch, Stage::Validate]);
    }
    for id in [8, 9, 10] {
        assert_eq!(progress.stages_for(id), vec![Stage::Fetch]);
    }
    assert_eq!(
        progress.stages_for(1),
        vec![
            Stage::Fetch,
            Stage::Validate,
            Stage::Trim,
            Stage::Extract,
            Stage::Scrub,
            Stage::Persist,
        ]
    );
    assert_eq!(*progress.total.lock().unwrap(), Some(10));
    assert_eq!(progress.settled.lock().unwrap().len(), 10);
    assert!(*progress.finished.lock().unwrap());
}

#[tokio::test]
async fn pool_size_does_not_change_outcomes() {
    let single = Fixture::new(&mixed_batch()).await;
    let pooled = Fixture::new(&mixed_batch()).await;

    let a = single.run(test_config(1)).await;
    let b = pooled.run(test_config(5)).await;

    assert_eq!(a.states, b.states);
    assert_eq!(
        (a.processed, a.rejected, a.failed),
        (b.processed, b.rejected, b.failed)
    );
}

#[tokio::test]
async fn requeued_rerun_is_byte_identical() {
    let fixture = Fixture::new(&[(1, Source::Pages(6)), (2, Source::Pages(4))]).await;
    fixture.run(test_config(2)).await;

    let first_text = fixture.content.read("Manual_1_(E1).txt").unwrap();
    let first = fixture.storage.get(1).await.unwrap().unwrap();

    // A processed record is not picked up again without a re-trigger.
    let idle = fixture.run(test_config(2)).await;
    assert_eq!(idle.settled(), 0);

    let requeued = fixture.storage.requeue(&[RecordState::Processed]).await.unwrap();
    assert_eq!(requeued, 2);

    let rerun = fixture.run(test_config(2)).await;
    assert_eq!(rerun.processed, 2);

    let second_text = fixture.content.read("Manual_1_(E1).txt").unwrap();
    let second = fixture.storage.get(1).await.unwrap().unwrap();
    assert_eq!(first_text.as_bytes(), second_text.as_bytes());
    assert_eq!(first.content_hash(), second.content_hash());
}

#[tokio::test]
async fn malformed_document_fails_validation() {
    let fixture = Fixture::new(&[(1, Source::Garbage), (2, Source::Pages(3))]).await;
    let result = fixture.run(test_config(2)).await;

    assert_eq!(result.failed, 1);
    assert_eq!(result.processed, 1);
    assert_eq!(result.errors[0].id, 1);
    assert_eq!(result.errors[0].stage, Stage::Validate);

    let failed = fixture.storage.get(1).await.unwrap().unwrap();
    assert!(failed.last_error().unwrap().starts_with("validate: parse error"));
}

#[tokio::test]
async fn undecodable_page_fails_extraction() {
    let fixture = Fixture::new(&[(1, Source::Unreadable), (2, Source::Pages(4))]).await;
    let result = fixture.run(test_config(2)).await;

    assert_eq!(result.failed, 1);
    assert_eq!(result.processed, 1);
    assert_eq!(result.errors[0].id, 1);
    assert_eq!(result.errors[0].stage, Stage::Extract);

    let failed = fixture.storage.get(1).await.unwrap().unwrap();
    assert_eq!(failed.state(), RecordState::Failed);
    assert!(failed.last_error().unwrap().starts_with("extract: extraction error"));
    assert!(failed.content_ref().is_none());
    assert!(fixture.content.read("Manual_1_(E1).txt").is_err());
}

/// Panics when a record enters `stage`.
struct PanicAt(Stage);

impl manualforge_core::ProgressReporter for PanicAt {
    fn batch_started(&self, _run_id: &manualforge_shared::RunId, _total: usize) {}
    fn stage(&self, _id: i64, stage: Stage) {
        if stage == self.0 {
            panic!("reporter blew up in {stage}");
        }
    }
    fn record_settled(&self, _id: i64, _state: RecordState) {}
    fn done(&self, _result: &manualforge_core::BatchResult) {}
}

#[tokio::test]
async fn panic_in_document_stage_is_charged_to_that_stage() {
    let fixture = Fixture::new(&[(1, Source::Pages(5))]).await;
    let result = fixture
        .pipeline(test_config(1))
        .run_batch(&CancellationToken::new(), Arc::new(PanicAt(Stage::Trim)))
        .await
        .unwrap();

    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].stage, Stage::Trim);
    assert!(result.errors[0].cause.contains("during trim"));

    let failed = fixture.storage.get(1).await.unwrap().unwrap();
    assert!(failed.last_error().unwrap().starts_with("trim: "));
}

#[tokio::test]
async fn cover_only_policy_keeps_back_page() {
    let fixture = Fixture::new(&[(1, Source::Pages(3))]).await;
    let config = PipelineConfig {
        trim_policy: TrimPolicy::CoverOnly,
        min_extent: 2,
        ..test_config(1)
    };
    fixture.run(config).await;

    let text = fixture.content.read("Manual_1_(E1).txt").unwrap();
    assert!(!text.contains("Cover"));
    assert!(text.contains("Back of manual 1"));
}

#[tokio::test]
async fn cancelled_before_start_dispatches_nothing() {
    let fixture = Fixture::new(&mixed_batch()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fixture
        .pipeline(test_config(5))
        .run_batch(&cancel, Arc::new(manualforge_core::SilentProgress))
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.settled(), 0);
    assert_eq!(result.not_attempted, 10);
    assert_eq!(fixture.storage.list_pending().await.unwrap().len(), 10);
}

#[tokio::test]
async fn cancel_mid_run_lets_in_flight_record_finish() {
    let fixture = Fixture::new(&mixed_batch()).await;
    let cancel = CancellationToken::new();
    let progress = Arc::new(RecordingProgress {
        cancel_after_first: Some(cancel.clone()),
        ..Default::default()
    });

    let result = fixture
        .pipeline(test_config(1))
        .run_batch(&cancel, progress.clone())
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.settled(), 1);
    assert_eq!(result.not_attempted, 9);
    assert_eq!(fixture.storage.list_pending().await.unwrap().len(), 9);

    let (id, state) = progress.settled.lock().unwrap()[0];
    assert_eq!(fixture.storage.get(id).await.unwrap().unwrap().state(), state);
}

#[tokio::test]
async fn run_summary_is_logged_and_raw_cache_filled() {
    let fixture = Fixture::new(&mixed_batch()).await;
    let cache_dir = fixture.dir.join("pdfs");
    let result = fixture
        .pipeline(test_config(4))
        .with_raw_cache(RawCache::new(&cache_dir))
        .run_batch(&CancellationToken::new(), Arc::new(manualforge_core::SilentProgress))
        .await
        .unwrap();

    let runs = fixture.storage.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, result.run_id);
    assert_eq!((runs[0].processed, runs[0].rejected, runs[0].failed), (5, 2, 3));
    assert_eq!(runs[0].pool_size, 4);

    // Fetched documents (good and short) are cached; unreachable ones are not.
    assert!(cache_dir.join("Manual_1_(E1).pdf").exists());
    assert!(cache_dir.join("Manual_6_(E6).pdf").exists());
    assert!(!cache_dir.join("Manual_8_(E8).pdf").exists());
}
