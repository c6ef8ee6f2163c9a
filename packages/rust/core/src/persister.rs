//! Final stage: write extracted text, then commit the record.
//!
//! The commit is the authoritative success signal. Text written to the
//! content store for a record whose commit fails is left in place and gets
//! overwritten by the next successful run.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use manualforge_shared::{ManualForgeError, Record, Result, content_hash};
use manualforge_storage::{ContentStore, RecordStore};

/// Writes content and commits records with a bounded retry on contention.
pub struct Persister<S> {
    store: Arc<S>,
    content: Arc<dyn ContentStore>,
    retries: u32,
    backoff: Duration,
}

// Manual impl: only the `Arc` is cloned, so `S` itself need not be `Clone`.
impl<S> Clone for Persister<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            content: Arc::clone(&self.content),
            retries: self.retries,
            backoff: self.backoff,
        }
    }
}

impl<S: RecordStore> Persister<S> {
    pub fn new(
        store: Arc<S>,
        content: Arc<dyn ContentStore>,
        retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            store,
            content,
            retries,
            backoff,
        }
    }

    /// Persist `text` for `record` and commit it as processed.
    ///
    /// Returns the committed record. Any failure is a persist error.
    pub async fn persist(&self, record: &Record, text: String, extent: u32) -> Result<Record> {
        let key = record.content_key();
        let hash = content_hash(&text);

        let content = Arc::clone(&self.content);
        let write_key = key.clone();
        tokio::task::spawn_blocking(move || content.write(&write_key, &text))
            .await
            .map_err(|e| ManualForgeError::persist(format!("content write task failed: {e}"), false))?
            .map_err(ManualForgeError::into_persist)?;
        debug!(record_id = record.id(), key = %key, "content written");

        let processed = record
            .processed(key, hash, extent)
            .map_err(ManualForgeError::into_persist)?;
        self.commit(&processed).await?;
        Ok(processed)
    }

    /// Commit `record`, retrying transient store contention with a linear backoff.
    pub async fn commit(&self, record: &Record) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.commit(record).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        record_id = record.id(),
                        attempt,
                        error = %e,
                        "commit contended, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e.into_persist()),
            }
        }
    }
}
