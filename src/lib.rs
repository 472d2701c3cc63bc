//! # exam-slicer
//!
//! Slice colour-annotated exam papers into a tree of questions, parts and
//! answers with mark totals.
//!
//! ## Why colour bands?
//!
//! Exam papers are laid out for print, not for machines: question numbers,
//! part letters, diagrams and answer lines share the same text flow, and a
//! single question often runs over several pages. Rather than guess at
//! layout, an operator draws a horizontal stroke across the printed paper
//! wherever something starts: **red** for a question, **green** for a part,
//! **purple** for its answer, and a **blue** rectangle around the printable
//! width. This crate reads those strokes back off the scan and does the rest.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    validate a local file or spill bytes to a temp file
//!  ├─ 2. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Detect   sample rows for red / green / purple bands, blue bounds
//!  ├─ 4. Plan     band → interval, carrying content over page breaks
//!  ├─ 5. OCR      crop every interval, recognise text (bounded timeout)
//!  ├─ 6. Build    colour state machine → question tree, stitched images
//!  └─ 7. Marks    bottom-up totals over containers
//! ```
//!
//! After slicing, an operator corrects the tree with [`tree::EditSession`]
//! and commits it through [`tree::persist()`] into any
//! [`tree::QuestionStore`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exam_slicer::{slice_document, SliceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // With the `tesseract` feature, regions are read by Tesseract.
//!     let config = SliceConfig::default();
//!     let output = slice_document("0625_s23_qp_31.pdf", &config).await?;
//!     for q in &output.questions {
//!         println!("{}: {} marks, {} parts", q.label, q.marks, q.children.len());
//!     }
//!     for d in &output.diagnostics {
//!         eprintln!("warning: {d}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `examslice` binary (clap + indicatif + anyhow + tracing-subscriber) |
//! | `tesseract` | off | Links Tesseract through `leptess` as the default OCR engine |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! exam-slicer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod markscheme;
pub mod model;
pub mod output;
pub mod paper_code;
pub mod pipeline;
pub mod progress;
pub mod slice;
pub mod tree;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSelection, SliceConfig, SliceConfigBuilder};
pub use error::{
    CodecError, Diagnostic, EditError, OcrError, PersistError, SliceError, StitchError, StoreError,
};
pub use markscheme::{apply_markscheme, Markscheme};
pub use model::{
    AnswerSpace, ColorBand, ColorKind, NodeKind, PageBitmap, QuestionNode, RecordId, Region,
    SpaceType,
};
pub use output::{DocumentMetadata, SliceOutput, SliceStats};
pub use paper_code::PaperCode;
pub use pipeline::composite::{composite_answer_view, AnswerOverlay, CompositeView};
pub use pipeline::ocr::{NoOcr, OcrEngine};
#[cfg(feature = "tesseract")]
pub use pipeline::ocr::Tesseract;
pub use progress::{NoopProgressCallback, ProgressCallback, SliceProgressCallback};
pub use slice::{inspect, load_markscheme, slice_bitmaps, slice_bytes, slice_document, slice_sync};
pub use tree::{apply_edit, persist, EditSession, InMemoryStore, PersistContext, TreeEdit, TreePath};
