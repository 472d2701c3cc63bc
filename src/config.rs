//! Configuration types for a slicing run.
//!
//! Every knob lives in [`SliceConfig`], built through [`SliceConfigBuilder`].
//! The detection thresholds are derived from a single `color_tolerance` so
//! that a scan with washed-out markers can be handled by turning one dial
//! instead of eight.

use crate::error::SliceError;
use crate::model::ColorKind;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for slicing one exam paper.
///
/// Built via [`SliceConfig::builder()`] or [`SliceConfig::default()`].
///
/// # Example
/// ```rust
/// use exam_slicer::SliceConfig;
///
/// let config = SliceConfig::builder()
///     .zoom(3.0)
///     .color_tolerance(45)
///     .build()
///     .unwrap();
/// assert_eq!(config.detection().thresholds.red.min_major, 165);
/// ```
#[derive(Clone)]
pub struct SliceConfig {
    /// Render scale for detection (pixels per PDF point). Range 0.5–8. Default: 2.0.
    pub zoom: f32,

    /// Scale region crops are delivered at. Default: 2.0.
    ///
    /// When it differs from `zoom`, crops are resampled so that OCR and the
    /// stored composites see a consistent resolution.
    pub region_zoom: f32,

    /// Sampling tolerance for marker classification. Default: 30.
    ///
    /// 30 gives the reference thresholds (e.g. red: R>180, G<100, B<100).
    /// Each extra unit relaxes every bound by one.
    pub color_tolerance: u8,

    /// Horizontal sampling stride in pixels. Default: 10.
    pub sample_stride: u32,

    /// Vertical sampling step in pixels. Default: 2.
    pub row_step: u32,

    /// Fraction of a row's samples that must match for the row to count. Default: 0.30.
    pub row_threshold: f32,

    /// Sampling stride (both axes) for the blue bounding rectangle. Default: 5.
    pub blue_stride: u32,

    /// Same-colour rows within this many page units merge into one band. Default: 10.
    pub merge_gap: f32,

    /// Page-end tails and page-top continuations shorter than this (page units)
    /// are dropped. Default: 50.
    pub min_tail_height: f32,

    /// Marks given to a part whose text carries none. Default: 1.
    pub default_part_marks: f64,

    /// Per-region OCR timeout in seconds. Default: 30.
    pub ocr_timeout_secs: u64,

    /// Concurrent OCR calls. Default: 4.
    pub concurrency: usize,

    /// Pages to slice. Default: all.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium library path. Falls back to `PDFIUM_LIB_PATH`, then the
    /// system library.
    pub pdfium_library: Option<PathBuf>,

    /// OCR engine. Falls back to Tesseract on `PATH`, then to no OCR at all.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            zoom: 2.0,
            region_zoom: 2.0,
            color_tolerance: 30,
            sample_stride: 10,
            row_step: 2,
            row_threshold: 0.30,
            blue_stride: 5,
            merge_gap: 10.0,
            min_tail_height: 50.0,
            default_part_marks: 1.0,
            ocr_timeout_secs: 30,
            concurrency: 4,
            pages: PageSelection::default(),
            password: None,
            pdfium_library: None,
            ocr_engine: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SliceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceConfig")
            .field("zoom", &self.zoom)
            .field("region_zoom", &self.region_zoom)
            .field("color_tolerance", &self.color_tolerance)
            .field("sample_stride", &self.sample_stride)
            .field("row_step", &self.row_step)
            .field("row_threshold", &self.row_threshold)
            .field("blue_stride", &self.blue_stride)
            .field("merge_gap", &self.merge_gap)
            .field("min_tail_height", &self.min_tail_height)
            .field("default_part_marks", &self.default_part_marks)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("pdfium_library", &self.pdfium_library)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|e| e.name()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SliceProgressCallback>"),
            )
            .finish()
    }
}

impl SliceConfig {
    /// Create a new builder for `SliceConfig`.
    pub fn builder() -> SliceConfigBuilder {
        SliceConfigBuilder {
            config: Self::default(),
        }
    }

    /// The detector parameters implied by this configuration.
    pub fn detection(&self) -> DetectionParams {
        DetectionParams {
            thresholds: ColorThresholds::with_tolerance(self.color_tolerance),
            sample_stride: self.sample_stride,
            row_step: self.row_step,
            row_threshold: self.row_threshold,
            blue_stride: self.blue_stride,
            merge_gap: self.merge_gap,
        }
    }
}

/// Builder for [`SliceConfig`].
#[derive(Debug)]
pub struct SliceConfigBuilder {
    config: SliceConfig,
}

impl SliceConfigBuilder {
    pub fn zoom(mut self, zoom: f32) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn region_zoom(mut self, zoom: f32) -> Self {
        self.config.region_zoom = zoom;
        self
    }

    pub fn color_tolerance(mut self, t: u8) -> Self {
        self.config.color_tolerance = t;
        self
    }

    pub fn sample_stride(mut self, px: u32) -> Self {
        self.config.sample_stride = px.max(1);
        self
    }

    pub fn row_step(mut self, px: u32) -> Self {
        self.config.row_step = px.max(1);
        self
    }

    pub fn row_threshold(mut self, fraction: f32) -> Self {
        self.config.row_threshold = fraction;
        self
    }

    pub fn blue_stride(mut self, px: u32) -> Self {
        self.config.blue_stride = px.max(1);
        self
    }

    pub fn merge_gap(mut self, units: f32) -> Self {
        self.config.merge_gap = units.max(0.0);
        self
    }

    pub fn min_tail_height(mut self, units: f32) -> Self {
        self.config.min_tail_height = units.max(0.0);
        self
    }

    pub fn default_part_marks(mut self, marks: f64) -> Self {
        self.config.default_part_marks = marks;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SliceConfig, SliceError> {
        let c = &self.config;
        if !(0.5..=8.0).contains(&c.zoom) {
            return Err(SliceError::InvalidConfig(format!(
                "zoom must be 0.5–8, got {}",
                c.zoom
            )));
        }
        if !(0.5..=8.0).contains(&c.region_zoom) {
            return Err(SliceError::InvalidConfig(format!(
                "region zoom must be 0.5–8, got {}",
                c.region_zoom
            )));
        }
        if !(c.row_threshold > 0.0 && c.row_threshold <= 1.0) {
            return Err(SliceError::InvalidConfig(format!(
                "row threshold must be in (0, 1], got {}",
                c.row_threshold
            )));
        }
        if !c.default_part_marks.is_finite() || c.default_part_marks < 0.0 {
            return Err(SliceError::InvalidConfig(format!(
                "default part marks must be ≥ 0, got {}",
                c.default_part_marks
            )));
        }
        if c.ocr_timeout_secs == 0 {
            return Err(SliceError::InvalidConfig(
                "OCR timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Detection parameters ─────────────────────────────────────────────────

/// Per-channel bounds for one marker colour.
///
/// A pixel matches when its `major` channels are all strictly above
/// `min_major` and its `minor` channels are all strictly below `max_minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBounds {
    pub min_major: u8,
    pub max_minor: u8,
}

/// Threshold set for every marker colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorThresholds {
    /// Major: R. Minor: G, B.
    pub red: ChannelBounds,
    /// Major: G. Minor: R, B.
    pub green: ChannelBounds,
    /// Major: R, B. Minor: G.
    pub purple: ChannelBounds,
    /// Major: B. Minor: R, G.
    pub blue: ChannelBounds,
}

impl ColorThresholds {
    /// Derive thresholds from a tolerance; 30 reproduces the reference set.
    pub fn with_tolerance(t: u8) -> Self {
        let bounds = |major_base: u8| ChannelBounds {
            min_major: major_base.saturating_sub(t),
            max_minor: 70u8.saturating_add(t),
        };
        Self {
            red: bounds(210),
            green: bounds(180),
            purple: bounds(180),
            blue: bounds(230),
        }
    }

    /// Classify one RGB pixel. Line colours take precedence Red, Green,
    /// Purple; Blue is reported only when no line colour matches.
    pub fn classify(&self, [r, g, b]: [u8; 3]) -> Option<ColorKind> {
        let ColorThresholds {
            red,
            green,
            purple,
            blue,
        } = self;
        if r > red.min_major && g < red.max_minor && b < red.max_minor {
            Some(ColorKind::Red)
        } else if g > green.min_major && r < green.max_minor && b < green.max_minor {
            Some(ColorKind::Green)
        } else if r > purple.min_major && b > purple.min_major && g < purple.max_minor {
            Some(ColorKind::Purple)
        } else if b > blue.min_major && r < blue.max_minor && g < blue.max_minor {
            Some(ColorKind::Blue)
        } else {
            None
        }
    }
}

/// Everything the colour-band detector needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    pub thresholds: ColorThresholds,
    pub sample_stride: u32,
    pub row_step: u32,
    pub row_threshold: f32,
    pub blue_stride: u32,
    pub merge_gap: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        SliceConfig::default().detection()
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Slice all pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Parse `"3"`, `"2-5"` or `"1,4,7"`.
    pub fn parse(s: &str) -> Result<Self, SliceError> {
        let s = s.trim();
        let bad = || SliceError::InvalidConfig(format!("invalid page selection '{s}'"));
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        if let Some((a, b)) = s.split_once('-') {
            let a = a.trim().parse().map_err(|_| bad())?;
            let b = b.trim().parse().map_err(|_| bad())?;
            return Ok(PageSelection::Range(a, b));
        }
        if s.contains(',') {
            let pages = s
                .split(',')
                .map(|p| p.trim().parse::<usize>().map_err(|_| bad()))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }
        s.parse().map(PageSelection::Single).map_err(|_| bad())
    }
}
