//! Core domain types for ManualForge records.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{ManualForgeError, Result};

/// Extension of persisted text files.
pub const TEXT_EXTENSION: &str = "txt";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RecordState / Stage / TrimPolicy
// ---------------------------------------------------------------------------

/// Processing state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Pending,
    Rejected,
    Processed,
    Failed,
}

impl RecordState {
    pub const ALL: [RecordState; 4] = [
        RecordState::Pending,
        RecordState::Rejected,
        RecordState::Processed,
        RecordState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Whether a run has settled this record.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = ManualForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ManualForgeError::validation(format!("unknown record state '{s}'")))
    }
}

/// A step of the per-record processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Validate,
    Trim,
    Extract,
    Scrub,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Validate => "validate",
            Self::Trim => "trim",
            Self::Extract => "extract",
            Self::Scrub => "scrub",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which structural units the trimmer removes before extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimPolicy {
    /// Drop the cover page and the back page.
    #[default]
    CoverAndBack,
    /// Drop only the cover page.
    CoverOnly,
}

impl TrimPolicy {
    /// Number of pages this policy removes.
    pub fn pages_removed(&self) -> u32 {
        match self {
            Self::CoverAndBack => 2,
            Self::CoverOnly => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoverAndBack => "cover-and-back",
            Self::CoverOnly => "cover-only",
        }
    }
}

impl FromStr for TrimPolicy {
    type Err = ManualForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cover-and-back" => Ok(Self::CoverAndBack),
            "cover-only" => Ok(Self::CoverOnly),
            other => Err(ManualForgeError::config(format!(
                "unknown trim policy '{other}': expected 'cover-and-back' or 'cover-only'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A catalog entry tracking one document's processing state and result.
///
/// Fields are private so that `content_ref` stays set exactly when the
/// record is `Processed`. Records come from [`Record::new`] (fresh catalog
/// entries), [`Record::restore`] (rows read back from the store) or one of
/// the transition methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    id: i64,
    title: String,
    source_link: String,
    state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

/// Every persisted column of a record, as read back from storage.
#[derive(Debug, Clone)]
pub struct RecordParts {
    pub id: i64,
    pub title: String,
    pub source_link: String,
    pub state: RecordState,
    pub content_ref: Option<String>,
    pub content_hash: Option<String>,
    pub extent: Option<u32>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a fresh `Pending` record, validating title and link.
    pub fn new(id: i64, title: impl Into<String>, source_link: impl Into<String>) -> Result<Self> {
        let title = title.into();
        let source_link = source_link.into();
        validate_title(&title)?;
        validate_link(&source_link)?;

        Ok(Self {
            id,
            title,
            source_link,
            state: RecordState::Pending,
            content_ref: None,
            content_hash: None,
            extent: None,
            last_error: None,
            updated_at: None,
        })
    }

    /// Rebuild a record from stored columns, rejecting rows that break the
    /// `content_ref` ⇔ `Processed` invariant.
    pub fn restore(parts: RecordParts) -> Result<Self> {
        validate_title(&parts.title)?;
        let processed = parts.state == RecordState::Processed;
        if processed != parts.content_ref.is_some() {
            return Err(ManualForgeError::validation(format!(
                "record {}: content_ref must be set exactly when state is processed (state = {})",
                parts.id, parts.state
            )));
        }

        Ok(Self {
            id: parts.id,
            title: parts.title,
            source_link: parts.source_link,
            state: parts.state,
            content_ref: parts.content_ref,
            content_hash: if processed { parts.content_hash } else { None },
            extent: if processed || parts.state == RecordState::Rejected {
                parts.extent
            } else {
                None
            },
            last_error: parts.last_error,
            updated_at: parts.updated_at,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn source_link(&self) -> &str {
        &self.source_link
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn content_ref(&self) -> Option<&str> {
        self.content_ref.as_deref()
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn extent(&self) -> Option<u32> {
        self.extent
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Storage key for this record's extracted text.
    pub fn content_key(&self) -> String {
        content_key(&self.title)
    }

    /// Settle as `Processed` with the persisted text's key and hash.
    pub fn processed(&self, content_ref: String, content_hash: String, extent: u32) -> Result<Self> {
        self.ensure_pending("processed")?;
        Ok(Self {
            state: RecordState::Processed,
            content_ref: Some(content_ref),
            content_hash: Some(content_hash),
            extent: Some(extent),
            last_error: None,
            updated_at: Some(Utc::now()),
            ..self.clone()
        })
    }

    /// Settle as `Rejected` (too few pages to carry a body).
    pub fn rejected(&self, extent: u32) -> Result<Self> {
        self.ensure_pending("rejected")?;
        Ok(Self {
            state: RecordState::Rejected,
            content_ref: None,
            content_hash: None,
            extent: Some(extent),
            last_error: None,
            updated_at: Some(Utc::now()),
            ..self.clone()
        })
    }

    /// Settle as `Failed`, remembering which stage broke and why.
    pub fn failed(&self, stage: Stage, cause: &str) -> Result<Self> {
        self.ensure_pending("failed")?;
        Ok(Self {
            state: RecordState::Failed,
            content_ref: None,
            content_hash: None,
            extent: None,
            last_error: Some(format!("{stage}: {cause}")),
            updated_at: Some(Utc::now()),
            ..self.clone()
        })
    }

    /// Put a settled record back in the queue (external re-trigger).
    pub fn requeued(&self) -> Self {
        Self {
            state: RecordState::Pending,
            content_ref: None,
            content_hash: None,
            extent: None,
            last_error: None,
            updated_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    fn ensure_pending(&self, target: &str) -> Result<()> {
        if self.state != RecordState::Pending {
            return Err(ManualForgeError::validation(format!(
                "record {}: cannot move from {} to {target} within a run",
                self.id, self.state
            )));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(ManualForgeError::validation("record title must not be empty"));
    }
    Ok(())
}

fn validate_link(link: &str) -> Result<()> {
    let url = Url::parse(link)
        .map_err(|e| ManualForgeError::validation(format!("invalid source link '{link}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ManualForgeError::validation(format!(
            "source link '{link}' uses unsupported scheme '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Keys and hashes
// ---------------------------------------------------------------------------

/// Make a title safe to use as a single file name.
///
/// Each whitespace character becomes `_`, path separators and NUL are
/// dropped, case is preserved. A result with nothing but dots is replaced
/// by `untitled` so it can never name a parent directory.
pub fn sanitize_title(title: &str) -> String {
    static UNSAFE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[/\\\x00]").expect("valid regex"));
    static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").expect("valid regex"));

    let stripped = UNSAFE_RE.replace_all(title, "");
    let sanitized = SPACE_RE.replace_all(&stripped, "_").to_string();

    if sanitized.chars().all(|c| c == '.') {
        "untitled".to_string()
    } else {
        sanitized
    }
}

/// Content-store key for a title: `sanitize(title) + ".txt"`.
pub fn content_key(title: &str) -> String {
    format!("{}.{TEXT_EXTENSION}", sanitize_title(title))
}

/// SHA-256 hex digest of persisted text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
