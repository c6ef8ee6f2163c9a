//! PDF handling for the per-record stage chain.
//!
//! - [`PdfDocument::parse`] reads raw bytes and exposes the page count (extent)
//! - [`validate`] decides whether a document carries enough pages to process
//! - [`trim`] drops the cover and/or back page per [`TrimPolicy`]
//! - [`extract`] reads the remaining pages as plain text
//!
//! Everything here is synchronous and CPU-bound; callers on an async
//! runtime should run it on the blocking pool.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use manualforge_shared::{ManualForgeError, Result, TrimPolicy};

// ---------------------------------------------------------------------------
// PdfDocument
// ---------------------------------------------------------------------------

/// A parsed PDF, owned by the worker processing its record.
#[derive(Debug)]
pub struct PdfDocument {
    inner: Document,
}

impl PdfDocument {
    /// Parse raw bytes. Malformed input is a parse error.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let inner = Document::load_mem(bytes)
            .map_err(|e| ManualForgeError::parse(format!("malformed PDF: {e}")))?;
        Ok(Self { inner })
    }

    /// Number of pages.
    pub fn extent(&self) -> u32 {
        self.inner.get_pages().len() as u32
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of the validation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Enough pages to carry a body once trimmed.
    Accept { extent: u32 },
    /// Too short; the record settles as rejected.
    Reject { extent: u32 },
}

impl Verdict {
    pub fn extent(&self) -> u32 {
        match self {
            Self::Accept { extent } | Self::Reject { extent } => *extent,
        }
    }
}

/// Reject documents with fewer than `min_extent` pages.
pub fn validate(doc: &PdfDocument, min_extent: u32) -> Verdict {
    let extent = doc.extent();
    if extent < min_extent {
        debug!(extent, min_extent, "rejecting short document");
        Verdict::Reject { extent }
    } else {
        Verdict::Accept { extent }
    }
}

// ---------------------------------------------------------------------------
// Trimming
// ---------------------------------------------------------------------------

/// Remove the pages named by `policy`, keeping the rest in order.
pub fn trim(mut doc: PdfDocument, policy: TrimPolicy) -> Result<PdfDocument> {
    let extent = doc.extent();
    let removed = policy.pages_removed();
    if extent <= removed {
        return Err(ManualForgeError::Transform(format!(
            "cannot apply {} to a {extent}-page document",
            policy.as_str()
        )));
    }

    let doomed: Vec<u32> = match policy {
        TrimPolicy::CoverAndBack => vec![1, extent],
        TrimPolicy::CoverOnly => vec![1],
    };
    doc.inner.delete_pages(&doomed);

    let expected = extent - removed;
    let actual = doc.extent();
    if actual != expected {
        return Err(ManualForgeError::Transform(format!(
            "expected {expected} pages after {}, found {actual}",
            policy.as_str()
        )));
    }

    debug!(before = extent, after = actual, policy = policy.as_str(), "trimmed document");
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract text page by page in reading order, one newline between pages.
///
/// A page with no text operators yields an empty line. A page whose content
/// streams cannot be decoded is an extraction error naming the page.
pub fn extract(doc: &PdfDocument) -> Result<String> {
    let mut pages = Vec::new();
    for (page_number, page_id) in doc.inner.get_pages() {
        check_page_content(&doc.inner, page_number, page_id)?;
        let text = doc.inner.extract_text(&[page_number]).map_err(|e| {
            ManualForgeError::Extraction(format!("page {page_number}: {e}"))
        })?;
        pages.push(text.trim_end().to_string());
    }
    Ok(pages.join("\n"))
}

/// Decode every content stream of a page, failing where `extract_text`
/// would silently skip content.
fn check_page_content(doc: &Document, page_number: u32, page_id: ObjectId) -> Result<()> {
    let unreadable =
        |why: String| ManualForgeError::Extraction(format!("page {page_number}: {why}"));

    let mut data = Vec::new();
    for stream_id in doc.get_page_contents(page_id) {
        let stream = doc
            .get_object(stream_id)
            .and_then(Object::as_stream)
            .map_err(|e| unreadable(format!("content stream {stream_id:?}: {e}")))?;

        if stream.dict.has(b"Filter") {
            let decoded = stream
                .decompressed_content()
                .map_err(|e| unreadable(format!("cannot decode content stream: {e}")))?;
            // lopdf logs and drops inflate errors, leaving empty output.
            if decoded.is_empty() && !stream.content.is_empty() {
                return Err(unreadable("content stream does not decompress".into()));
            }
            data.extend_from_slice(&decoded);
        } else {
            data.extend_from_slice(&stream.content);
        }
        data.push(b'\n');
    }

    let content = Content::decode(&data)
        .map_err(|e| unreadable(format!("malformed content stream: {e}")))?;

    // The content parser stops at the first bad token without reporting it,
    // so a well-formed stream must end with the last decoded operator.
    let body = data.trim_ascii_end();
    match content.operations.last() {
        None if !body.is_empty() => {
            return Err(unreadable("no operators in content stream".into()));
        }
        Some(op) if !body.ends_with(op.operator.as_bytes()) => {
            return Err(unreadable(format!(
                "unparseable content after `{}` operator",
                op.operator
            )));
        }
        _ => {}
    }

    let mut open_text = false;
    for op in &content.operations {
        match op.operator.as_str() {
            "BT" if open_text => return Err(unreadable("nested text object".into())),
            "BT" => open_text = true,
            "ET" if !open_text => return Err(unreadable("ET without BT".into())),
            "ET" => open_text = false,
            _ => {}
        }
    }
    if open_text {
        return Err(unreadable("unterminated text object".into()));
    }
    Ok(())
}
