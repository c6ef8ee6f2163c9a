//! Catalog listing: the one remote call that seeds the record store.

use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use manualforge_shared::{ManualForgeError, Result};

use crate::fetch::Fetcher;

/// One manual as listed by the catalog. Only the fields the pipeline
/// consumes are kept; everything else in the listing is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub manual_title: String,
    pub manual_link: String,
}

/// A decoded listing. Entries that do not have the expected shape are
/// counted in `undecodable` instead of failing the whole listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub undecodable: usize,
}

impl Catalog {
    /// Number of items the listing carried, decodable or not.
    pub fn listed(&self) -> usize {
        self.entries.len() + self.undecodable
    }
}

#[derive(Deserialize)]
struct Listing {
    instructions: Instructions,
}

#[derive(Deserialize)]
struct Instructions {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Decode a catalog listing body.
///
/// Only the envelope must be well-formed; each item is decoded on its own.
pub fn parse_catalog(body: &[u8]) -> Result<Catalog> {
    let listing: Listing = serde_json::from_slice(body)
        .map_err(|e| ManualForgeError::parse(format!("invalid catalog listing: {e}")))?;

    let mut catalog = Catalog::default();
    for (index, item) in listing.instructions.data.into_iter().enumerate() {
        match serde_json::from_value::<CatalogEntry>(item) {
            Ok(entry) => catalog.entries.push(entry),
            Err(e) => {
                warn!(index, error = %e, "skipping undecodable catalog entry");
                catalog.undecodable += 1;
            }
        }
    }
    Ok(catalog)
}

impl Fetcher {
    /// GET the catalog listing at `url` and decode its entries.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_catalog(&self, url: &str) -> Result<Catalog> {
        let parsed = Url::parse(url)
            .map_err(|e| ManualForgeError::Fetch(format!("{url}: invalid URL: {e}")))?;
        let body = self.get_bytes(&parsed).await?;
        let catalog = parse_catalog(&body)?;
        info!(
            entries = catalog.entries.len(),
            undecodable = catalog.undecodable,
            "fetched catalog"
        );
        Ok(catalog)
    }
}
