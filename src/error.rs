//! Error types for the exam-slicer library.
//!
//! Failures fall into two groups:
//!
//! * **Fatal** errors stop the operation they belong to and come back as
//!   `Err(..)`: [`SliceError`] when the input document cannot be opened at
//!   all, [`EditError`] when a tree edit cannot be addressed, and
//!   [`PersistError`] when the storage collaborator fails mid-import.
//!
//! * **Non-fatal** conditions are reported as [`Diagnostic`] values stored
//!   in [`crate::output::SliceOutput`]. A band sequence the state machine
//!   cannot interpret, a stitched width mismatch or a failed OCR call never
//!   abort a slicing run; they are recorded and the run carries on with a
//!   best-effort tree.

use crate::tree::edit::TreePath;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the `slice_*` entry points.
#[derive(Debug, Error)]
pub enum SliceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection does not contain a single page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib) to use a\n\
specific copy, or install pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal condition met while slicing a document.
///
/// Page numbers are 1-indexed; `y` is in page units (points).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No bands on a page, or a band the state machine cannot place
    /// (a Green with no open Red, a Purple with no part to attach to).
    DetectionAmbiguity { page: usize, y: f32, detail: String },

    /// Stitched inputs of inconsistent width, or overlays falling outside
    /// the base image.
    GeometryMismatch { detail: String },

    /// OCR failed or timed out; the region's text was left empty.
    RecognitionFailure { page: usize, y: f32, detail: String },

    /// A single page could not be rasterised and was skipped.
    RenderFailed { page: usize, detail: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DetectionAmbiguity { page, y, detail } => {
                write!(f, "Page {page} @ y={y:.1}: {detail}")
            }
            Diagnostic::GeometryMismatch { detail } => write!(f, "Geometry mismatch: {detail}"),
            Diagnostic::RecognitionFailure { page, y, detail } => {
                write!(f, "Page {page} @ y={y:.1}: OCR failed: {detail}")
            }
            Diagnostic::RenderFailed { page, detail } => {
                write!(f, "Page {page}: rasterisation failed: {detail}")
            }
        }
    }
}

/// Stitching was asked to join nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StitchError {
    #[error("No region images provided for stitching")]
    Empty,
}

/// Failures of the PNG / data-URI codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures of the OCR collaborator. Always degraded to empty text by the
/// pipeline; kept typed so diagnostics can say what went wrong.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine '{0}' is unavailable")]
    Unavailable(String),

    #[error("OCR failed: {0}")]
    Recognition(String),

    #[error("OCR timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Could not encode region for OCR: {0}")]
    Encode(String),

    #[error("OCR task panicked: {0}")]
    Panicked(String),
}

/// A tree edit that could not be applied. The tree is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("No node at path '{path}'")]
    NodeNotFound { path: TreePath },

    #[error("Child index {index} out of range at '{path}' ({len} children)")]
    ChildIndexOutOfRange {
        path: TreePath,
        index: usize,
        len: usize,
    },

    #[error("Node '{path}' is a container; its marks are derived from its parts")]
    NotALeaf { path: TreePath },

    #[error("Invalid marks value {value}: marks must be a finite number ≥ 0")]
    InvalidMarks { value: f64 },
}

/// A write error reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Persisting an import failed; nothing from that import was committed.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Missing persistence context field: {0}")]
    MissingContext(&'static str),

    #[error("Could not begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("Failed to write question '{label}' at '{path}': {source}")]
    WriteQuestion {
        path: TreePath,
        label: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write answer space {index} of '{path}': {source}")]
    WriteAnswerSpace {
        path: TreePath,
        index: usize,
        #[source]
        source: StoreError,
    },

    #[error("Failed to encode image of '{path}': {detail}")]
    Encode { path: TreePath, detail: String },

    #[error("Commit failed: {0}")]
    Commit(#[source] StoreError),
}
