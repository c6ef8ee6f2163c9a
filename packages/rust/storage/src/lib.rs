//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the record table
//! and the batch history. The [`RecordStore`] trait is the narrow view the
//! pipeline needs; [`content`] holds the filesystem side (extracted text and
//! the optional raw-document cache).
//!
//! **Access rules:**
//! - pipeline runs and catalog import: read-write via [`Storage::open`]
//! - listing and reporting: read-only via [`Storage::open_readonly`]

pub mod content;
mod migrations;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use manualforge_shared::{
    ManualForgeError, Record, RecordParts, RecordState, Result, RunId, TrimPolicy,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use content::{ContentStore, FsContentStore, RawCache};

/// How long a statement waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

const RECORD_COLUMNS: &str =
    "id, title, source_link, state, content_ref, content_hash, extent, last_error, updated_at";

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Persistent record storage as seen by the pipeline.
///
/// `commit` must be a serializable single-row upsert; lock contention is
/// reported as a transient persist error so callers can retry.
pub trait RecordStore: Send + Sync {
    /// All records currently in the `Pending` state.
    fn list_pending(&self) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// Look a record up by id.
    fn get(&self, id: i64) -> impl Future<Output = Result<Option<Record>>> + Send;

    /// Insert or overwrite a record.
    fn commit(&self, record: &Record) -> impl Future<Output = Result<()>> + Send;

    /// Remember the outcome of a finished batch.
    fn log_run(&self, summary: &RunSummary) -> impl Future<Output = Result<()>> + Send {
        let _ = summary;
        async { Ok(()) }
    }
}

/// Stats for one finished batch, as stored in `pipeline_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pool_size: usize,
    pub trim_policy: TrimPolicy,
    pub processed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes writers sharing this handle.
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ManualForgeError::io(parent, e))?;
        }

        let storage = Self::connect(path, false).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ManualForgeError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        // PRAGMA busy_timeout answers with a row, so it goes through `query`.
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), params![])
            .await
            .map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ManualForgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ManualForgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Insert catalog records that are not known yet. Existing ids are left
    /// untouched. Returns the number of rows inserted.
    pub async fn insert_new_records(&self, records: &[Record]) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let mut inserted = 0;
        for record in records {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO records (id, title, source_link, state)
                     VALUES (?1, ?2, ?3, 'pending')",
                    params![record.id(), record.title(), record.source_link()],
                )
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::debug!(listed = records.len(), inserted, "inserted catalog records");
        Ok(inserted)
    }

    /// List records, optionally filtered by state, ordered by id.
    pub async fn list_records(&self, state: Option<RecordState>) -> Result<Vec<Record>> {
        let mut rows = match state {
            Some(state) => {
                self.conn
                    .query(
                        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE state = ?1 ORDER BY id"),
                        params![state.as_str()],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY id"),
                        params![],
                    )
                    .await
            }
        }
        .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Number of records in each state (every state present, zero if unused).
    pub async fn count_by_state(&self) -> Result<BTreeMap<RecordState, u64>> {
        let mut counts: BTreeMap<RecordState, u64> =
            RecordState::ALL.into_iter().map(|s| (s, 0)).collect();

        let mut rows = self
            .conn
            .query("SELECT state, COUNT(*) FROM records GROUP BY state", params![])
            .await
            .map_err(storage_err)?;

        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let state: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            counts.insert(state.parse()?, count.max(0) as u64);
        }
        Ok(counts)
    }

    /// Reset records in any of `states` to `Pending`, clearing their results.
    /// Returns the number of records re-queued.
    pub async fn requeue(&self, states: &[RecordState]) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let mut requeued = 0;
        for state in states.iter().filter(|s| s.is_terminal()) {
            requeued += self
                .conn
                .execute(
                    "UPDATE records
                     SET state = 'pending', content_ref = NULL, content_hash = NULL, extent = NULL,
                         last_error = NULL, updated_at = ?1
                     WHERE state = ?2",
                    params![now.as_str(), state.as_str()],
                )
                .await
                .map_err(storage_err)?;
        }

        tracing::info!(?states, requeued, "requeued records");
        Ok(requeued)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Store the summary of a finished batch.
    pub async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.check_writable()?;
        let stats_json = serde_json::to_string(summary)
            .map_err(|e| ManualForgeError::Storage(format!("serialize run summary: {e}")))?;

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, started_at, finished_at, stats_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    summary.run_id.to_string(),
                    summary.started_at.to_rfc3339(),
                    summary.finished_at.to_rfc3339(),
                    stats_json,
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent batch summaries, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let json: String = row.get(0).map_err(storage_err)?;
            let summary = serde_json::from_str(&json)
                .map_err(|e| ManualForgeError::Storage(format!("invalid run summary: {e}")))?;
            results.push(summary);
        }
        Ok(results)
    }
}

impl RecordStore for Storage {
    async fn list_pending(&self) -> Result<Vec<Record>> {
        self.list_records(Some(RecordState::Pending)).await
    }

    async fn get(&self, id: i64) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn commit(&self, record: &Record) -> Result<()> {
        self.check_writable().map_err(ManualForgeError::into_persist)?;
        let updated_at = record.updated_at().unwrap_or_else(Utc::now).to_rfc3339();

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO records (id, title, source_link, state, content_ref, content_hash, extent, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   source_link = excluded.source_link,
                   state = excluded.state,
                   content_ref = excluded.content_ref,
                   content_hash = excluded.content_hash,
                   extent = excluded.extent,
                   last_error = excluded.last_error,
                   updated_at = excluded.updated_at",
                params![
                    record.id(),
                    record.title(),
                    record.source_link(),
                    record.state().as_str(),
                    record.content_ref(),
                    record.content_hash(),
                    record.extent().map(i64::from),
                    record.last_error(),
                    updated_at,
                ],
            )
            .await
            .map_err(commit_err)?;

        tracing::debug!(record_id = record.id(), state = %record.state(), "committed record");
        Ok(())
    }

    async fn log_run(&self, summary: &RunSummary) -> Result<()> {
        self.record_run(summary).await
    }
}

fn storage_err(e: libsql::Error) -> ManualForgeError {
    ManualForgeError::Storage(e.to_string())
}

/// Map a failed commit, flagging lock contention as transient.
fn commit_err(e: libsql::Error) -> ManualForgeError {
    let message = e.to_string();
    let transient = is_contention(&message);
    ManualForgeError::persist(message, transient)
}

fn is_contention(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database is locked") || lower.contains("busy")
}

/// Convert a database row to a [`Record`].
fn row_to_record(row: &libsql::Row) -> Result<Record> {
    let state: String = row.get(3).map_err(storage_err)?;
    let updated_at = match row.get::<String>(8).ok() {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ManualForgeError::Storage(format!("invalid date: {e}")))?,
        ),
        None => None,
    };

    Record::restore(RecordParts {
        id: row.get::<i64>(0).map_err(storage_err)?,
        title: row.get::<String>(1).map_err(storage_err)?,
        source_link: row.get::<String>(2).map_err(storage_err)?,
        state: state.parse()?,
        content_ref: row.get::<String>(4).ok(),
        content_hash: row.get::<String>(5).ok(),
        extent: row.get::<i64>(6).ok().map(|v| v as u32),
        last_error: row.get::<String>(7).ok(),
        updated_at,
    })
}
