//! Core pipeline orchestration for ManualForge.
//!
//! This crate ties the fetcher, document stages, scrubber and storage
//! together into batch runs ([`Pipeline::run_batch`]) and catalog import
//! ([`import_catalog`]).

pub mod cancel;
pub mod import;
pub mod persister;
pub mod pipeline;

pub use cancel::CancellationToken;
pub use import::{ImportSummary, import_catalog, records_from_catalog};
pub use persister::Persister;
pub use pipeline::{BatchResult, Pipeline, ProgressReporter, RecordError, SilentProgress};
