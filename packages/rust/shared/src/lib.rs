//! Shared types, error model, and configuration for ManualForge.
//!
//! This crate is the foundation depended on by all other ManualForge crates.
//! It provides:
//! - [`ManualForgeError`], the unified error type
//! - Domain types ([`Record`], [`RecordState`], [`Stage`], [`TrimPolicy`], [`RunId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CatalogConfig, DEFAULT_CATALOG_URL, DEFAULT_SCRUB_PHRASES, PipelineConfig,
    PipelineSection, ScrubConfig, StorageConfig, config_dir, config_file_path, init_config,
    init_config_in, load_config, load_config_from, render_config,
};
pub use error::{ManualForgeError, Result};
pub use types::{
    Record, RecordParts, RecordState, RunId, Stage, TEXT_EXTENSION, TrimPolicy, content_hash,
    content_key, sanitize_title,
};
