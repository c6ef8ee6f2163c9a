//! Application configuration for ManualForge.
//!
//! User config lives at `~/.manualforge/manualforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ManualForgeError, Result};
use crate::types::TrimPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "manualforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".manualforge";

/// Default catalog listing endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://club.autodoc.co.uk/api/v4/instructions/all?order_key=popular&order_type=desc&q=&maker_id=16&type=1&limit=1000&offset=0";

/// Boilerplate phrases stamped into the manuals by the publishing tooling.
pub const DEFAULT_SCRUB_PHRASES: &[&str] = &[
    "Evaluation Warning : The document was created with Spire.PDF for Python.",
    "CLUB.AUTODOC.CO.UK",
    "SIMILAR VIDEO TUTORIAL",
    "AUTODOC",
    "Buy tools",
    "VIEW MORE TUTORIALS",
    "WELL DONE!",
    "To protect the environment from pollution...",
];

// ---------------------------------------------------------------------------
// Config structs (matching manualforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where records and extracted text live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Worker pool and stage policies.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Boilerplate removal.
    #[serde(default)]
    pub scrub: ScrubConfig,

    /// Catalog listing source.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database holding the record table.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory receiving one `.txt` file per processed record.
    #[serde(default = "default_text_dir")]
    pub text_dir: PathBuf,

    /// Optional directory where fetched PDFs are kept for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_cache_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            text_dir: default_text_dir(),
            raw_cache_dir: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("manuals.db")
}
fn default_text_dir() -> PathBuf {
    PathBuf::from("manuals_text")
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Number of concurrent workers.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Documents with fewer pages than this are rejected.
    #[serde(default = "default_min_extent")]
    pub min_extent: u32,

    /// Which pages the trimmer removes.
    #[serde(default)]
    pub trim_policy: TrimPolicy,

    /// Retries for a commit that hit store contention.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Base backoff between commit retries (multiplied by the attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-request timeout for document downloads.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Downloads larger than this fail the fetch stage.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,

    /// Allow loopback/private hosts in source links (local mirrors).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            min_extent: default_min_extent(),
            trim_policy: TrimPolicy::default(),
            commit_retries: default_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_document_bytes: default_max_document_bytes(),
            allow_private_hosts: false,
        }
    }
}

fn default_pool_size() -> usize {
    5
}
fn default_min_extent() -> u32 {
    3
}
fn default_commit_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    50
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_max_document_bytes() -> u64 {
    50 * 1024 * 1024
}

/// `[scrub]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrubConfig {
    /// Literal phrases removed from extracted text, applied in order.
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            phrases: default_phrases(),
        }
    }
}

fn default_phrases() -> Vec<String> {
    DEFAULT_SCRUB_PHRASES.iter().map(|p| (*p).to_string()).collect()
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Listing endpoint returning the catalog JSON.
    #[serde(default = "default_catalog_url")]
    pub url: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
        }
    }
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, handed to the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pool_size: usize,
    pub min_extent: u32,
    pub trim_policy: TrimPolicy,
    pub commit_retries: u32,
    pub retry_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub max_document_bytes: u64,
    pub allow_private_hosts: bool,
    pub scrub_phrases: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            pool_size: p.pool_size,
            min_extent: p.min_extent,
            trim_policy: p.trim_policy,
            commit_retries: p.commit_retries,
            retry_backoff_ms: p.retry_backoff_ms,
            fetch_timeout_secs: p.fetch_timeout_secs,
            max_document_bytes: p.max_document_bytes,
            allow_private_hosts: p.allow_private_hosts,
            scrub_phrases: config.scrub.phrases.clone(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ManualForgeError::config("pool_size must be at least 1"));
        }
        if self.min_extent <= self.trim_policy.pages_removed() {
            return Err(ManualForgeError::config(format!(
                "min_extent ({}) must exceed the pages removed by trim policy '{}' ({})",
                self.min_extent,
                self.trim_policy.as_str(),
                self.trim_policy.pages_removed()
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ManualForgeError::config("fetch_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.manualforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ManualForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.manualforge/manualforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ManualForgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ManualForgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    init_config_in(&dir)
}

/// Write a default config file into `dir`, creating it if needed.
pub fn init_config_in(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| ManualForgeError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| ManualForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config to pretty TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| ManualForgeError::config(e.to_string()))
}
