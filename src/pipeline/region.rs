//! Turning detected bands into regions, and regions into images and text.
//!
//! Two steps live here:
//!
//! 1. [`plan_intervals`] walks the bands of every page in document order and
//!    emits one [`Interval`] per stretch of paper a band governs: from the
//!    band to the next line band on the same page, or to the page end.
//!    Content that runs over a page break is carried: the strip from the top
//!    of the next page down to its first band becomes a *continuation* of the
//!    same colour.
//! 2. [`RegionExtractor`] crops an interval out of its page bitmap and runs
//!    OCR on the crop, degrading any recognition failure to empty text.
//!
//! Planning is pure and works in page units, so the state machine in
//! [`crate::tree::builder`] can be tested with hand-written band lists.

use crate::error::{Diagnostic, OcrError};
use crate::model::{ColorBand, ColorKind, HorizontalSpan, PageBitmap, Region};
use crate::pipeline::ocr::{recognize_with_timeout, OcrEngine};
use crate::pipeline::textclean::clean_ocr_text;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ── Planning ─────────────────────────────────────────────────────────────

/// The bands found on one page, plus the page height in page units.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub page_index: usize,
    pub height: f32,
    /// Ascending `y_position`.
    pub bands: Vec<ColorBand>,
}

/// How an interval relates to the tree being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalRole {
    /// Starts at a band and opens whatever its colour opens.
    Opening,
    /// Top-of-page strip carrying the previous page's last colour on.
    Continuation,
}

/// A stretch of one page governed by one band colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub kind: ColorKind,
    pub role: IntervalRole,
    pub region: Region,
}

impl Interval {
    pub fn is_continuation(&self) -> bool {
        self.role == IntervalRole::Continuation
    }
}

/// What the last interval of a page passes to the next page.
#[derive(Debug, Clone, Copy)]
enum Carry {
    /// Content continues: the next page's top strip extends it.
    Continue(ColorKind),
    /// The band sat too close to the page end to keep its strip; the next
    /// page's top strip opens it instead.
    Open(ColorKind),
}

#[derive(Debug, Clone, Copy)]
struct OpenInterval {
    kind: ColorKind,
    role: IntervalRole,
    y_start: f32,
    /// Opened by a band from the previous page rather than one on this page.
    carried: bool,
}

/// Nesting depth of a line colour: a question opens parts, a part opens answers.
fn depth(kind: ColorKind) -> u8 {
    match kind {
        ColorKind::Red => 0,
        ColorKind::Green => 1,
        ColorKind::Purple | ColorKind::Blue => 2,
    }
}

/// Plan every interval of a document.
///
/// * Blue bands never open intervals; their span becomes the horizontal
///   bound applied to every interval closed after them, across pages, until
///   the next Blue band.
/// * A page-end tail shorter than `min_tail` keeps no content; its band is
///   instead opened by the next page's top strip.
/// * A continuation strip shorter than `min_tail` is dropped.
/// * A carried opening strip shorter than `min_tail` is dropped unless the
///   band closing it nests inside it (a Red carried onto a Green), since
///   otherwise it would open an empty question, part or answer.
/// * A page with no bands and nothing carried onto it is reported as a
///   [`Diagnostic::DetectionAmbiguity`].
pub fn plan_intervals(pages: &[PageLayout], min_tail: f32) -> (Vec<Interval>, Vec<Diagnostic>) {
    let mut intervals = Vec::new();
    let mut diagnostics = Vec::new();
    let mut bound: Option<HorizontalSpan> = None;
    let mut carry: Option<Carry> = None;

    for page in pages {
        let mut open = carry.take().map(|c| match c {
            Carry::Continue(kind) => OpenInterval {
                kind,
                role: IntervalRole::Continuation,
                y_start: 0.0,
                carried: true,
            },
            Carry::Open(kind) => OpenInterval {
                kind,
                role: IntervalRole::Opening,
                y_start: 0.0,
                carried: true,
            },
        });

        if page.bands.is_empty() && open.is_none() {
            warn!("Page {}: no colour bands", page.page_index + 1);
            diagnostics.push(Diagnostic::DetectionAmbiguity {
                page: page.page_index + 1,
                y: 0.0,
                detail: "no colour bands on page; content ignored".into(),
            });
            continue;
        }

        for band in &page.bands {
            if band.color_kind == ColorKind::Blue {
                bound = band.span;
                continue;
            }
            if let Some(o) = open.take() {
                let closing = Closing {
                    y_end: band.y_position,
                    kind: Some(band.color_kind),
                };
                push_closed(&mut intervals, page.page_index, o, closing, bound, min_tail);
            }
            open = Some(OpenInterval {
                kind: band.color_kind,
                role: IntervalRole::Opening,
                y_start: band.y_position,
                carried: false,
            });
        }

        if let Some(o) = open {
            let tail = page.height - o.y_start;
            carry = Some(match o.role {
                IntervalRole::Opening if !o.carried && tail < min_tail => {
                    debug!(
                        "Page {}: {} band at y={:.1} too close to page end; opening on next page",
                        page.page_index + 1,
                        o.kind,
                        o.y_start
                    );
                    Carry::Open(o.kind)
                }
                _ => {
                    let closing = Closing {
                        y_end: page.height,
                        kind: None,
                    };
                    push_closed(&mut intervals, page.page_index, o, closing, bound, min_tail);
                    Carry::Continue(o.kind)
                }
            });
        }
    }

    (intervals, diagnostics)
}

/// Where an open interval ends: at a band of `kind`, or at the page end.
#[derive(Debug, Clone, Copy)]
struct Closing {
    y_end: f32,
    kind: Option<ColorKind>,
}

fn push_closed(
    out: &mut Vec<Interval>,
    page_index: usize,
    o: OpenInterval,
    closing: Closing,
    bound: Option<HorizontalSpan>,
    min_tail: f32,
) {
    let y_end = closing.y_end;
    let height = y_end - o.y_start;
    if height <= 0.0 {
        return;
    }
    if o.role == IntervalRole::Continuation && height < min_tail {
        debug!(
            "Page {}: dropping {:.1}-unit {} continuation",
            page_index + 1,
            height,
            o.kind
        );
        return;
    }
    let nests = closing.kind.is_some_and(|k| depth(k) > depth(o.kind));
    if o.role == IntervalRole::Opening && o.carried && height < min_tail && !nests {
        debug!(
            "Page {}: dropping {:.1}-unit carried {} strip",
            page_index + 1,
            height,
            o.kind
        );
        return;
    }
    out.push(Interval {
        kind: o.kind,
        role: o.role,
        region: Region {
            page_index,
            y_start: o.y_start,
            y_end,
            x_bounds: bound,
        },
    });
}

// ── Extraction ───────────────────────────────────────────────────────────

/// The image and recognised text of one region.
#[derive(Debug, Clone)]
pub struct RegionContent {
    pub image: DynamicImage,
    pub text: String,
}

/// A region's content plus the OCR failure, if any, that left its text empty.
#[derive(Debug)]
pub struct Extracted {
    pub content: RegionContent,
    pub ocr_error: Option<OcrError>,
}

/// Crops regions out of page bitmaps and recognises their text.
#[derive(Clone)]
pub struct RegionExtractor {
    ocr: Arc<dyn OcrEngine>,
    region_zoom: f32,
    timeout: Duration,
}

impl RegionExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, region_zoom: f32, timeout: Duration) -> Self {
        Self {
            ocr,
            region_zoom,
            timeout,
        }
    }

    /// Crop `region` out of `page`.
    ///
    /// The source bitmap is not modified. Coordinates are clamped to the
    /// page, the result is at least 1×1 px, and it is resampled when the
    /// requested zoom differs from the page's.
    pub fn crop(&self, page: &PageBitmap, region: &Region) -> DynamicImage {
        let (w, h) = (page.image.width(), page.image.height());
        let to_px = |units: f32, max: u32| ((units * page.zoom).round().max(0.0) as u32).min(max);

        let y0 = to_px(region.y_start, h.saturating_sub(1));
        let y1 = to_px(region.y_end, h).max(y0 + 1);
        let (x0, x1) = match region.x_bounds {
            Some(span) => {
                let x0 = to_px(span.x_start, w.saturating_sub(1));
                (x0, to_px(span.x_end, w).max(x0 + 1))
            }
            None => (0, w.max(1)),
        };

        let crop = page.image.crop_imm(x0, y0, x1 - x0, y1 - y0);
        if (self.region_zoom - page.zoom).abs() < f32::EPSILON {
            return crop;
        }
        let ratio = self.region_zoom / page.zoom;
        let nw = ((crop.width() as f32 * ratio).round() as u32).max(1);
        let nh = ((crop.height() as f32 * ratio).round() as u32).max(1);
        crop.resize_exact(nw, nh, FilterType::Lanczos3)
    }

    /// OCR an image with the configured timeout, returning cleaned text.
    pub async fn recognize(&self, image: DynamicImage) -> Result<String, OcrError> {
        let raw = recognize_with_timeout(self.ocr.clone(), image, self.timeout).await?;
        Ok(clean_ocr_text(&raw))
    }

    /// Crop and recognise one region. Never fails: OCR errors leave the
    /// text empty and are handed back for reporting.
    pub async fn extract(&self, page: &PageBitmap, region: &Region) -> Extracted {
        let image = self.crop(page, region);
        match self.recognize(image.clone()).await {
            Ok(text) => Extracted {
                content: RegionContent { image, text },
                ocr_error: None,
            },
            Err(e) => Extracted {
                content: RegionContent {
                    image,
                    text: String::new(),
                },
                ocr_error: Some(e),
            },
        }
    }
}
