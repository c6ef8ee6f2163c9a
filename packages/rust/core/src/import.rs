//! Catalog import: listing → validated pending records → record store.

use tracing::{info, instrument, warn};

use manualforge_fetcher::{CatalogEntry, Fetcher};
use manualforge_shared::{Record, Result};
use manualforge_storage::Storage;

/// Counts reported by [`import_catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    /// Entries in the listing.
    pub listed: usize,
    /// New records added to the store.
    pub inserted: u64,
    /// Entries dropped because they could not be decoded or failed validation.
    pub skipped: usize,
}

/// Turn listing entries into pending records, skipping invalid ones.
pub fn records_from_catalog(entries: &[CatalogEntry]) -> (Vec<Record>, usize) {
    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match Record::new(entry.id, entry.manual_title.as_str(), entry.manual_link.as_str()) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(id = entry.id, error = %e, "skipping catalog entry");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

/// Fetch the catalog at `url` and add records the store does not know yet.
///
/// Existing records keep their state; re-importing is safe.
#[instrument(skip_all, fields(url = %url))]
pub async fn import_catalog(fetcher: &Fetcher, storage: &Storage, url: &str) -> Result<ImportSummary> {
    let catalog = fetcher.fetch_catalog(url).await?;
    let (records, invalid) = records_from_catalog(&catalog.entries);
    let inserted = storage.insert_new_records(&records).await?;

    let summary = ImportSummary {
        listed: catalog.listed(),
        inserted,
        skipped: catalog.undecodable + invalid,
    };
    info!(
        listed = summary.listed,
        inserted = summary.inserted,
        skipped = summary.skipped,
        "catalog imported"
    );
    Ok(summary)
}
