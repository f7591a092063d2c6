//! PDF text extraction
//!
//! Extraction goes through the [`TextExtractor`] capability so the session can be
//! built with any backend. [`LopdfExtractor`] is the default one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Failed to extract text from page {page}: {message}")]
    Page { page: usize, message: String },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// A loaded document. Pages are numbered from 1.
pub trait PdfDocument {
    fn page_count(&self) -> usize;

    /// Text fragments of one page, in reading order.
    fn page_fragments(&self, page: usize) -> Result<Vec<String>, PdfError>;
}

pub trait TextExtractor: Send + Sync {
    fn load(&self, bytes: &[u8]) -> Result<Box<dyn PdfDocument>, PdfError>;
}

/// Text pulled out of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub page_count: usize,
}

impl ExtractedDocument {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Join every page's fragments with a space and terminate each page with a newline.
pub fn extract_text(extractor: &dyn TextExtractor, bytes: &[u8]) -> Result<ExtractedDocument, PdfError> {
    let document = extractor.load(bytes)?;
    let page_count = document.page_count();

    let mut text = String::new();
    for page in 1..=page_count {
        let fragments = document.page_fragments(page)?;
        text.push_str(&fragments.join(" "));
        text.push('\n');
    }

    debug!(pages = page_count, chars = text.len(), "extracted pdf text");
    Ok(ExtractedDocument { text, page_count })
}

/// Read a file and extract its text on the blocking pool.
pub async fn extract_file(
    extractor: Arc<dyn TextExtractor>,
    path: impl AsRef<Path>,
) -> Result<ExtractedDocument, PdfError> {
    let path = path.as_ref().to_path_buf();
    let bytes = tokio::fs::read(&path).await.map_err(|source| PdfError::Read {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "read pdf");

    tokio::task::spawn_blocking(move || extract_text(extractor.as_ref(), &bytes))
        .await
        .map_err(|e| PdfError::Task(e.to_string()))?
}

/// Display name for a path (file name, falling back to the whole path)
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn load(&self, bytes: &[u8]) -> Result<Box<dyn PdfDocument>, PdfError> {
        let mut document = Document::load_mem(bytes).map_err(|e| PdfError::Load(e.to_string()))?;
        // get_pages is keyed by page number, so this is already in page order
        let pages = document.get_pages();
        for (&number, &page_id) in &pages {
            split_text_runs(&mut document, page_id).map_err(|e| PdfError::Page {
                page: number as usize,
                message: e.to_string(),
            })?;
        }

        let page_numbers = pages.into_keys().collect();
        Ok(Box::new(LopdfDocument { document, page_numbers }))
    }
}

/// Close the text object after every text-showing operator.
///
/// `Document::extract_text` only breaks lines at `ET`, so runs placed with
/// `Td`/`T*` inside one `BT` block would otherwise come back glued together.
/// With each run in its own text object, every line of the extracted page is
/// one fragment, decoded with the font that was selected for it. `'` and `"`
/// are rewritten to a line move followed by `Tj` so their strings are kept.
fn split_text_runs(document: &mut Document, page_id: ObjectId) -> lopdf::Result<()> {
    let content = Content::decode(&document.get_page_content(page_id)?)?;

    let mut operations = Vec::with_capacity(content.operations.len());
    let mut split = false;
    for operation in content.operations {
        match operation.operator.as_str() {
            "Tj" | "TJ" => operations.push(operation),
            "'" | "\"" => {
                let shown: Vec<Object> = operation.operands.last().cloned().into_iter().collect();
                operations.push(Operation::new("T*", vec![]));
                operations.push(Operation::new("Tj", shown));
            }
            _ => {
                operations.push(operation);
                continue;
            }
        }
        operations.push(Operation::new("ET", vec![]));
        operations.push(Operation::new("BT", vec![]));
        split = true;
    }

    if !split {
        return Ok(());
    }
    document.change_page_content(page_id, Content { operations }.encode()?)
}

struct LopdfDocument {
    document: Document,
    page_numbers: Vec<u32>,
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_fragments(&self, page: usize) -> Result<Vec<String>, PdfError> {
        let number = page
            .checked_sub(1)
            .and_then(|idx| self.page_numbers.get(idx))
            .copied()
            .ok_or_else(|| PdfError::Page {
                page,
                message: "no such page".to_string(),
            })?;

        let text = self
            .document
            .extract_text(&[number])
            .map_err(|e| PdfError::Page {
                page,
                message: e.to_string(),
            })?;

        // One line per text run, see split_text_runs
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
