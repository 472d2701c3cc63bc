//! Progress-callback trait for slicing events.
//!
//! Inject an [`Arc<dyn SliceProgressCallback>`] via
//! [`crate::config::SliceConfigBuilder::progress_callback`] to receive events
//! as pages are scanned and regions recognised.
//!
//! # Example
//!
//! ```rust
//! use exam_slicer::{SliceConfig, SliceProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RegionCounter(AtomicUsize);
//!
//! impl SliceProgressCallback for RegionCounter {
//!     fn on_region_complete(&self, _index: usize, _total: usize, _text_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = SliceConfig::builder()
//!     .progress_callback(Arc::new(RegionCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Diagnostic;
use std::sync::Arc;

/// Called by the slicing pipeline as it works through a document.
///
/// Region events may arrive concurrently and out of order because OCR runs
/// several regions at once; implementations must synchronise their own state.
/// All methods default to no-ops.
pub trait SliceProgressCallback: Send + Sync {
    /// Called once before the first page is scanned.
    fn on_slice_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after colour detection on one page.
    ///
    /// * `page_num` : 1-indexed page number
    /// * `bands`    : number of bands found on the page
    fn on_page_scanned(&self, page_num: usize, total_pages: usize, bands: usize) {
        let _ = (page_num, total_pages, bands);
    }

    /// Called when a region's text has been recognised.
    fn on_region_complete(&self, index: usize, total: usize, text_len: usize) {
        let _ = (index, total, text_len);
    }

    /// Called when OCR failed for a region; the region keeps empty text.
    fn on_region_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once with the final tree size and any diagnostics.
    fn on_slice_complete(&self, questions: usize, diagnostics: &[Diagnostic]) {
        let _ = (questions, diagnostics);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl SliceProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SliceConfig`].
pub type ProgressCallback = Arc<dyn SliceProgressCallback>;
