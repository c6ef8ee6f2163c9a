//! Batch orchestration: pending records → fetch → validate → trim → extract
//! → scrub → persist, over a fixed pool of workers.
//!
//! Every record settles as `Processed`, `Rejected` or `Failed`. A failing
//! record never aborts its siblings; `run_batch` returns once every
//! dispatched record has settled.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use manualforge_document::{PdfDocument, Verdict};
use manualforge_fetcher::Fetcher;
use manualforge_scrub::Scrubber;
use manualforge_shared::{
    ManualForgeError, PipelineConfig, Record, RecordState, Result, RunId, Stage,
};
use manualforge_storage::{ContentStore, RawCache, RecordStore, RunSummary};

use crate::cancel::CancellationToken;
use crate::persister::Persister;

// ---------------------------------------------------------------------------
// Results and progress
// ---------------------------------------------------------------------------

/// A record that settled as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub id: i64,
    pub stage: Stage,
    pub cause: String,
}

/// Outcome of one `run_batch` call.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub run_id: RunId,
    pub processed: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Pending records left undispatched because the run was cancelled.
    pub not_attempted: usize,
    pub cancelled: bool,
    pub errors: Vec<RecordError>,
    /// Terminal state of every dispatched record.
    pub states: BTreeMap<i64, RecordState>,
    pub elapsed: Duration,
}

impl BatchResult {
    /// Number of records that reached a terminal state.
    pub fn settled(&self) -> usize {
        self.processed + self.rejected + self.failed
    }
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called once the pending set is known.
    fn batch_started(&self, run_id: &RunId, total: usize);
    /// Called as a record enters a stage.
    fn stage(&self, id: i64, stage: Stage);
    /// Called when a record reaches its terminal state.
    fn record_settled(&self, id: i64, state: RecordState);
    /// Called when the batch completes.
    fn done(&self, result: &BatchResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_started(&self, _run_id: &RunId, _total: usize) {}
    fn stage(&self, _id: i64, _stage: Stage) {}
    fn record_settled(&self, _id: i64, _state: RecordState) {}
    fn done(&self, _result: &BatchResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The per-record stage chain plus everything it needs, shared by all workers.
struct Stages<S> {
    store: Arc<S>,
    fetcher: Fetcher,
    scrubber: Arc<Scrubber>,
    persister: Persister<S>,
    raw_cache: Option<RawCache>,
    config: PipelineConfig,
}

impl<S> Clone for Stages<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fetcher: self.fetcher.clone(),
            scrubber: Arc::clone(&self.scrubber),
            persister: self.persister.clone(),
            raw_cache: self.raw_cache.clone(),
            config: self.config.clone(),
        }
    }
}

/// Batch orchestrator over a record store and a content store.
pub struct Pipeline<S> {
    stages: Arc<Stages<S>>,
}

impl<S: RecordStore + 'static> Pipeline<S> {
    /// Build a pipeline. The configuration is fixed for the pipeline's lifetime.
    pub fn new(
        store: Arc<S>,
        content: Arc<dyn ContentStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(&config)?;
        let persister = Persister::new(
            Arc::clone(&store),
            content,
            config.commit_retries,
            Duration::from_millis(config.retry_backoff_ms),
        );

        Ok(Self {
            stages: Arc::new(Stages {
                store,
                fetcher,
                scrubber: Arc::new(Scrubber::new(config.scrub_phrases.iter().cloned())),
                persister,
                raw_cache: None,
                config,
            }),
        })
    }

    /// Keep a copy of every fetched document in `cache`.
    pub fn with_raw_cache(mut self, cache: RawCache) -> Self {
        // Copies the stage set if a previous run still holds it.
        Arc::make_mut(&mut self.stages).raw_cache = Some(cache);
        self
    }

    /// Directory receiving raw documents, if caching is on.
    pub fn raw_cache(&self) -> Option<&RawCache> {
        self.stages.raw_cache.as_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.stages.config
    }

    /// Process every pending record and return once all dispatched records
    /// have settled.
    ///
    /// Cancellation stops dispatch; in-flight records finish their chain and
    /// the remainder stays pending, counted as `not_attempted`.
    #[instrument(skip_all, fields(pool_size = self.stages.config.pool_size))]
    pub async fn run_batch(
        &self,
        cancel: &CancellationToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<BatchResult> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = RunId::new();

        let pending = self.stages.store.list_pending().await?;
        let total = pending.len();
        info!(%run_id, total, "starting batch");
        progress.batch_started(&run_id, total);

        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let workers = self.stages.config.pool_size.min(total.max(1));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(worker(
                worker_id,
                Arc::clone(&self.stages),
                Arc::clone(&queue),
                cancel.clone(),
                Arc::clone(&progress),
            )));
        }

        let mut outcomes = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(mut settled) => outcomes.append(&mut settled),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        let not_attempted = queue.lock().await.len();
        let result = summarize(run_id, outcomes, not_attempted, cancel.is_cancelled(), start.elapsed());

        let summary = RunSummary {
            run_id: result.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            pool_size: self.stages.config.pool_size,
            trim_policy: self.stages.config.trim_policy,
            processed: result.processed,
            rejected: result.rejected,
            failed: result.failed,
            not_attempted: result.not_attempted,
            cancelled: result.cancelled,
        };
        if let Err(e) = self.stages.store.log_run(&summary).await {
            warn!(error = %e, "failed to record run summary");
        }

        progress.done(&result);

        info!(
            run_id = %result.run_id,
            processed = result.processed,
            rejected = result.rejected,
            failed = result.failed,
            not_attempted = result.not_attempted,
            elapsed_ms = result.elapsed.as_millis(),
            "batch complete"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Terminal outcome of one record within a run.
#[derive(Debug)]
struct Settled {
    id: i64,
    state: RecordState,
    error: Option<RecordError>,
}

/// Pull records until the queue drains or the run is cancelled.
async fn worker<S: RecordStore + 'static>(
    worker_id: usize,
    stages: Arc<Stages<S>>,
    queue: Arc<Mutex<VecDeque<Record>>>,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
) -> Vec<Settled> {
    let mut settled = Vec::new();
    loop {
        if cancel.is_cancelled() {
            debug!(worker_id, "cancelled, stopping dispatch");
            break;
        }
        let Some(record) = queue.lock().await.pop_front() else {
            break;
        };

        let outcome = stages.process(record, &progress).await;
        progress.record_settled(outcome.id, outcome.state);
        settled.push(outcome);
    }
    settled
}

/// A stage failure, tagged with the stage that produced it.
type StageResult<T> = std::result::Result<T, (Stage, ManualForgeError)>;

/// What the blocking document stages produced.
enum DocumentOutcome {
    Rejected { extent: u32 },
    Text { text: String, extent: u32 },
}

impl<S: RecordStore + 'static> Stages<S> {
    #[instrument(skip_all, fields(record_id = record.id()))]
    async fn process(&self, record: Record, progress: &Arc<dyn ProgressReporter>) -> Settled {
        progress.stage(record.id(), Stage::Fetch);
        let bytes = match self.fetcher.fetch(record.source_link()).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(&record, Stage::Fetch, e).await,
        };

        let outcome = match self.run_document_stages(&record, bytes, progress).await {
            Ok(outcome) => outcome,
            Err((stage, e)) => return self.fail(&record, stage, e).await,
        };

        match outcome {
            DocumentOutcome::Rejected { extent } => self.reject(&record, extent).await,
            DocumentOutcome::Text { text, extent } => {
                progress.stage(record.id(), Stage::Persist);
                match self.persister.persist(&record, text, extent).await {
                    Ok(processed) => {
                        info!(extent, content_ref = ?processed.content_ref(), "record processed");
                        Settled {
                            id: record.id(),
                            state: RecordState::Processed,
                            error: None,
                        }
                    }
                    Err(e) => self.fail(&record, Stage::Persist, e).await,
                }
            }
        }
    }

    /// Validate, trim, extract and scrub on the blocking pool.
    async fn run_document_stages(
        &self,
        record: &Record,
        bytes: Vec<u8>,
        progress: &Arc<dyn ProgressReporter>,
    ) -> StageResult<DocumentOutcome> {
        let id = record.id();
        let title = record.title().to_string();
        let min_extent = self.config.min_extent;
        let policy = self.config.trim_policy;
        let scrubber = Arc::clone(&self.scrubber);
        let raw_cache = self.raw_cache.clone();
        let progress = Arc::clone(progress);

        // Last stage entered on the blocking thread, so a panic there is
        // charged to the stage that was running.
        let current = Arc::new(StdMutex::new(Stage::Validate));
        let tracker = Arc::clone(&current);

        let task = tokio::task::spawn_blocking(move || -> StageResult<DocumentOutcome> {
            let enter = |stage: Stage| {
                if let Ok(mut slot) = tracker.lock() {
                    *slot = stage;
                }
                progress.stage(id, stage);
            };

            if let Some(cache) = &raw_cache {
                if let Err(e) = cache.store(&title, &bytes) {
                    warn!(record_id = id, error = %e, "failed to cache raw document");
                }
            }

            enter(Stage::Validate);
            let doc = PdfDocument::parse(&bytes).map_err(|e| (Stage::Validate, e))?;
            drop(bytes);
            let extent = match manualforge_document::validate(&doc, min_extent) {
                Verdict::Reject { extent } => return Ok(DocumentOutcome::Rejected { extent }),
                Verdict::Accept { extent } => extent,
            };

            enter(Stage::Trim);
            let doc = manualforge_document::trim(doc, policy).map_err(|e| (Stage::Trim, e))?;

            enter(Stage::Extract);
            let raw_text = manualforge_document::extract(&doc).map_err(|e| (Stage::Extract, e))?;

            enter(Stage::Scrub);
            let text = scrubber.scrub(&raw_text);

            Ok(DocumentOutcome::Text { text, extent })
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let stage = current.lock().map(|s| *s).unwrap_or(Stage::Validate);
                Err((stage, task_failure(stage, &e)))
            }
        }
    }

    async fn reject(&self, record: &Record, extent: u32) -> Settled {
        let rejected = match record.rejected(extent) {
            Ok(rejected) => rejected,
            Err(e) => return self.fail(record, Stage::Validate, e).await,
        };
        match self.persister.commit(&rejected).await {
            Ok(()) => {
                info!(extent, "record rejected");
                Settled {
                    id: record.id(),
                    state: RecordState::Rejected,
                    error: None,
                }
            }
            Err(e) => self.fail(record, Stage::Persist, e).await,
        }
    }

    /// Settle `record` as failed, committing the failure on a best-effort basis.
    async fn fail(&self, record: &Record, stage: Stage, err: ManualForgeError) -> Settled {
        let cause = err.to_string();
        warn!(record_id = record.id(), %stage, error = %cause, "record failed");

        match record.failed(stage, &cause) {
            Ok(failed) => {
                if let Err(e) = self.persister.commit(&failed).await {
                    error!(record_id = record.id(), error = %e, "could not record failure");
                }
            }
            Err(e) => error!(record_id = record.id(), error = %e, "could not mark record failed"),
        }

        Settled {
            id: record.id(),
            state: RecordState::Failed,
            error: Some(RecordError {
                id: record.id(),
                stage,
                cause,
            }),
        }
    }
}

/// Error for a blocking document task that panicked or was cancelled in `stage`.
fn task_failure(stage: Stage, err: &tokio::task::JoinError) -> ManualForgeError {
    let message = format!("document task failed during {stage}: {err}");
    match stage {
        Stage::Validate => ManualForgeError::parse(message),
        Stage::Extract => ManualForgeError::Extraction(message),
        _ => ManualForgeError::Transform(message),
    }
}

fn summarize(
    run_id: RunId,
    outcomes: Vec<Settled>,
    not_attempted: usize,
    cancelled: bool,
    elapsed: Duration,
) -> BatchResult {
    let mut result = BatchResult {
        run_id,
        processed: 0,
        rejected: 0,
        failed: 0,
        not_attempted,
        cancelled,
        errors: Vec::new(),
        states: BTreeMap::new(),
        elapsed,
    };

    for outcome in outcomes {
        match outcome.state {
            RecordState::Processed => result.processed += 1,
            RecordState::Rejected => result.rejected += 1,
            RecordState::Failed => result.failed += 1,
            RecordState::Pending => {}
        }
        result.states.insert(outcome.id, outcome.state);
        result.errors.extend(outcome.error);
    }
    result.errors.sort_by_key(|e| e.id);
    result
}
