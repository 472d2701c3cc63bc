//! Full-document slicing entry points.
//!
//! ## Why one eager pass?
//!
//! A question may start on one page and end three pages later, and its
//! label and marks are only known once the red interval that opens it has
//! been recognised. The tree therefore cannot be emitted page by page: every
//! selected page is rasterised and scanned, the intervals are planned over
//! the whole document, and only then is OCR fanned out over the regions.
//!
//! ```text
//! PDF ──▶ rasterise ──▶ detect (per page) ──▶ plan intervals
//!                                                   │
//!            SliceOutput ◀── build tree ◀── OCR (N regions at a time)
//! ```

use crate::config::SliceConfig;
use crate::error::{Diagnostic, SliceError};
use crate::markscheme::{parse_markscheme, Markscheme};
use crate::model::PageBitmap;
use crate::output::{DocumentMetadata, SliceOutput, SliceStats};
use crate::pipeline::detect::detect_bands;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::ocr;
use crate::pipeline::region::{plan_intervals, Extracted, Interval, PageLayout, RegionExtractor};
use crate::pipeline::render::{self, RenderRequest};
use crate::tree::builder::build_tree;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Slice a colour-annotated exam PDF into a question tree.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(SliceOutput)` whenever the document could be opened, even if no
/// band was found (the tree is then empty). Anything recovered along the
/// way is listed in `output.diagnostics`.
///
/// # Errors
/// Returns `Err(SliceError)` only for fatal errors:
/// - File not found / permission denied
/// - Not a valid PDF, or a wrong / missing password
/// - No selected page exists in the document
/// - The pdfium library could not be loaded
pub async fn slice_document(
    path: impl AsRef<Path>,
    config: &SliceConfig,
) -> Result<SliceOutput, SliceError> {
    let path = path.as_ref();
    info!("Starting slice: {}", path.display());
    let resolved = input::resolve_local(path)?;
    slice_resolved(&resolved, config).await
}

/// Slice PDF bytes held in memory.
///
/// The bytes are spilled to a managed temporary file, removed on return.
///
/// # Example
/// ```rust,no_run
/// use exam_slicer::{slice_bytes, SliceConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("0625_s23_qp_31.pdf")?;
/// let output = slice_bytes(&bytes, &SliceConfig::default()).await?;
/// println!("{} questions, {} marks", output.questions.len(), output.total_marks());
/// # Ok(())
/// # }
/// ```
pub async fn slice_bytes(bytes: &[u8], config: &SliceConfig) -> Result<SliceOutput, SliceError> {
    let resolved = input::spill_bytes(bytes)?;
    slice_resolved(&resolved, config).await
}

/// Synchronous wrapper around [`slice_document`].
///
/// Creates a temporary tokio runtime internally. OCR calls that outlived
/// `ocr_timeout_secs` are abandoned when it returns, not waited for.
pub fn slice_sync(path: impl AsRef<Path>, config: &SliceConfig) -> Result<SliceOutput, SliceError> {
    block_on_bounded(slice_document(path, config))?
}

/// Drive `fut` on a private runtime, then shut it down without joining
/// blocking tasks still running past their deadline.
fn block_on_bounded<F: Future>(fut: F) -> Result<F::Output, SliceError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| SliceError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    let out = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(out)
}

/// Slice pages that are already rasterised.
///
/// Skips PDF handling entirely, so it also serves scans that arrive as
/// images. Pages must be in document order.
pub async fn slice_bitmaps(
    pages: Vec<PageBitmap>,
    config: &SliceConfig,
) -> Result<SliceOutput, SliceError> {
    let start = Instant::now();
    let total_pages = pages.len();
    let mut output = run_pipeline(pages, None, config, Vec::new()).await?;
    output.stats.total_pages = total_pages;
    output.stats.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Page count, page sizes and document metadata, without slicing.
pub async fn inspect(
    path: impl AsRef<Path>,
    config: &SliceConfig,
) -> Result<DocumentMetadata, SliceError> {
    let resolved = input::resolve_local(path.as_ref())?;
    render::extract_metadata(
        resolved.path(),
        config.password.as_deref(),
        config.pdfium_library.as_deref(),
    )
    .await
}

/// Read the text layer of a mark-scheme PDF from `start_page` (0-based)
/// and parse its answer table.
pub async fn load_markscheme(
    path: impl AsRef<Path>,
    config: &SliceConfig,
    start_page: usize,
) -> Result<Markscheme, SliceError> {
    let resolved = input::resolve_local(path.as_ref())?;
    let pages = render::extract_page_text(
        resolved.path(),
        config.password.as_deref(),
        config.pdfium_library.as_deref(),
        start_page,
    )
    .await?;
    let scheme = parse_markscheme(&pages);
    info!(
        "Mark scheme: {} questions from {} pages",
        scheme.questions.len(),
        pages.len()
    );
    Ok(scheme)
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn slice_resolved(
    resolved: &ResolvedInput,
    config: &SliceConfig,
) -> Result<SliceOutput, SliceError> {
    let total_start = Instant::now();

    // ── Step 1: Rasterise selected pages ─────────────────────────────────
    let render_start = Instant::now();
    let request = RenderRequest {
        pdf_path: resolved.path().to_path_buf(),
        password: config.password.clone(),
        pdfium_library: config.pdfium_library.clone(),
        zoom: config.zoom,
        pages: config.pages.clone(),
    };
    let rasterised = render::rasterize_document(request.clone()).await?;

    // Regions are cropped from pages rendered at their own scale, not
    // resampled from the detection bitmaps.
    let crop_pages = if (config.region_zoom - config.zoom).abs() > f32::EPSILON {
        let again = render::rasterize_document(RenderRequest {
            zoom: config.region_zoom,
            ..request
        })
        .await?;
        Some(again.pages)
    } else {
        None
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Rendered {} pages in {}ms",
        rasterised.pages.len(),
        render_duration_ms
    );

    // ── Steps 2-5: detect, plan, recognise, build ────────────────────────
    let mut output =
        run_pipeline(rasterised.pages, crop_pages, config, rasterised.diagnostics).await?;

    output.stats.total_pages = rasterised.total_pages;
    output.stats.render_duration_ms = render_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Slice complete: {} questions, {} marks, {}ms total",
        output.questions.len(),
        output.total_marks(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// `crop_pages`, when given, are the same pages rendered at `region_zoom`;
/// otherwise regions are cropped from the detection bitmaps.
async fn run_pipeline(
    pages: Vec<PageBitmap>,
    crop_pages: Option<Vec<PageBitmap>>,
    config: &SliceConfig,
    mut diagnostics: Vec<Diagnostic>,
) -> Result<SliceOutput, SliceError> {
    let cb = config.progress_callback.as_ref();
    let page_total = pages.len();
    if let Some(cb) = cb {
        cb.on_slice_start(page_total);
    }

    // ── Detect bands on every page ───────────────────────────────────────
    let params = config.detection();
    let (pages, layouts) = tokio::task::spawn_blocking(move || {
        let layouts: Vec<PageLayout> = pages
            .iter()
            .map(|page| PageLayout {
                page_index: page.page_index,
                height: page.height_units(),
                bands: detect_bands(page, &params),
            })
            .collect();
        (pages, layouts)
    })
    .await
    .map_err(|e| SliceError::Internal(format!("Detection task panicked: {}", e)))?;

    let mut bands_detected = 0;
    for layout in &layouts {
        bands_detected += layout.bands.len();
        if let Some(cb) = cb {
            cb.on_page_scanned(layout.page_index + 1, page_total, layout.bands.len());
        }
    }
    debug!("Detected {} bands over {} pages", bands_detected, page_total);

    // ── Plan intervals ───────────────────────────────────────────────────
    let (intervals, planning) = plan_intervals(&layouts, config.min_tail_height);
    diagnostics.extend(planning);

    let sources = crop_pages.unwrap_or(pages);
    let jobs: Vec<(&Interval, &PageBitmap)> = intervals
        .iter()
        .filter_map(|iv| {
            let page = sources
                .iter()
                .find(|p| p.page_index == iv.region.page_index);
            if page.is_none() {
                warn!(
                    "Page {}: no bitmap to crop from; region skipped",
                    iv.region.page_index + 1
                );
            }
            page.map(|page| (iv, page))
        })
        .collect();

    // ── Crop and recognise regions ───────────────────────────────────────
    let ocr_start = Instant::now();
    let extractor = RegionExtractor::new(
        ocr::resolve_engine(config.ocr_engine.clone()),
        config.region_zoom,
        Duration::from_secs(config.ocr_timeout_secs),
    );
    let extractor = &extractor;
    let total = jobs.len();
    let extracted: Vec<Extracted> = stream::iter(jobs.iter().enumerate().map(
        |(index, (interval, page))| async move {
            let result = extractor.extract(page, &interval.region).await;
            if let Some(cb) = cb {
                match &result.ocr_error {
                    None => cb.on_region_complete(index, total, result.content.text.len()),
                    Some(e) => cb.on_region_error(index, total, &e.to_string()),
                }
            }
            result
        },
    ))
    .buffered(config.concurrency.max(1))
    .collect()
    .await;
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    let mut ocr_failures = 0;
    let mut contents = Vec::with_capacity(extracted.len());
    let mut kept = Vec::with_capacity(extracted.len());
    for ((interval, _), result) in jobs.iter().zip(extracted) {
        if let Some(e) = result.ocr_error {
            ocr_failures += 1;
            warn!(
                "Page {} @ y={:.1}: OCR failed: {}",
                interval.region.page_index + 1,
                interval.region.y_start,
                e
            );
            diagnostics.push(Diagnostic::RecognitionFailure {
                page: interval.region.page_index + 1,
                y: interval.region.y_start,
                detail: e.to_string(),
            });
        }
        kept.push((*interval).clone());
        contents.push(result.content);
    }

    // ── Build the tree ───────────────────────────────────────────────────
    let built = build_tree(&kept, contents, config.default_part_marks);
    diagnostics.extend(built.diagnostics);

    if let Some(cb) = cb {
        cb.on_slice_complete(built.questions.len(), &diagnostics);
    }

    Ok(SliceOutput {
        questions: built.questions,
        diagnostics,
        stats: SliceStats {
            total_pages: page_total,
            pages_scanned: page_total,
            bands_detected,
            regions_extracted: total,
            ocr_failures,
            total_duration_ms: 0,
            render_duration_ms: 0,
            ocr_duration_ms,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::pipeline::ocr::OcrEngine;
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
    use std::sync::Arc;

    fn blank_page(index: usize) -> PageBitmap {
        let img = RgbaImage::from_pixel(200, 300, Rgba([255, 255, 255, 255]));
        PageBitmap::new(index, 1.0, DynamicImage::ImageRgba8(img))
    }

    /// A white zoom-1 page with a full-width red rule at y = 10.
    fn red_ruled_page(index: usize) -> PageBitmap {
        let mut img = RgbaImage::from_pixel(200, 300, Rgba([255, 255, 255, 255]));
        for y in 10..14 {
            for x in 0..200 {
                img.put_pixel(x, y, Rgba([220, 20, 20, 255]));
            }
        }
        PageBitmap::new(index, 1.0, DynamicImage::ImageRgba8(img))
    }

    struct SleepyOcr(Duration);

    impl OcrEngine for SleepyOcr {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn recognize_text(&self, _image: &DynamicImage) -> Result<String, OcrError> {
            std::thread::sleep(self.0);
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn blank_pages_give_empty_tree_with_diagnostics() {
        let config = SliceConfig::builder()
            .ocr_engine(std::sync::Arc::new(ocr::NoOcr))
            .build()
            .unwrap();
        let out = slice_bitmaps(vec![blank_page(0), blank_page(1)], &config)
            .await
            .unwrap();
        assert!(out.questions.is_empty());
        assert_eq!(out.stats.total_pages, 2);
        assert_eq!(out.stats.bands_detected, 0);
        assert_eq!(out.stats.regions_extracted, 0);
        assert_eq!(out.diagnostics.len(), 2);
        assert!(out
            .diagnostics
            .iter()
            .all(|d| matches!(d, Diagnostic::DetectionAmbiguity { .. })));
    }

    #[tokio::test]
    async fn no_pages_is_not_an_error() {
        let out = slice_bitmaps(Vec::new(), &SliceConfig::default())
            .await
            .unwrap();
        assert!(out.questions.is_empty());
        assert!(out.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let err = slice_document("/definitely/not/here.pdf", &SliceConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::FileNotFound { .. }));
    }

    #[test]
    fn timed_out_recognition_does_not_hold_the_caller() {
        let config = SliceConfig::builder()
            .zoom(1.0)
            .region_zoom(1.0)
            .ocr_engine(Arc::new(SleepyOcr(Duration::from_secs(5))))
            .ocr_timeout_secs(1)
            .build()
            .unwrap();

        let start = Instant::now();
        let out = block_on_bounded(slice_bitmaps(vec![red_ruled_page(0)], &config))
            .unwrap()
            .unwrap();

        assert!(
            start.elapsed() < Duration::from_secs(3),
            "returned after {:?}",
            start.elapsed()
        );
        assert_eq!(out.stats.ocr_failures, 1);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::RecognitionFailure { .. })));
    }

    #[tokio::test]
    async fn regions_are_cropped_from_pages_rendered_at_region_zoom() {
        let config = SliceConfig::builder()
            .zoom(1.0)
            .region_zoom(2.0)
            .ocr_engine(Arc::new(ocr::NoOcr))
            .build()
            .unwrap();
        // Same page at twice the scale, filled so its pixels are recognisable.
        let grey = Rgba([90, 90, 90, 255]);
        let hi_res = PageBitmap::new(
            0,
            2.0,
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 600, grey)),
        );

        let out = run_pipeline(vec![red_ruled_page(0)], Some(vec![hi_res]), &config, Vec::new())
            .await
            .unwrap();

        assert_eq!(out.questions.len(), 1);
        let img = out.questions[0].content_image.as_ref().unwrap();
        assert_eq!((img.width(), img.height()), (400, 580));
        assert_eq!(img.get_pixel(0, 0), grey);
        assert_eq!(img.get_pixel(399, 579), grey);
    }

    #[tokio::test]
    async fn regions_without_a_crop_page_are_skipped() {
        let config = SliceConfig::builder()
            .zoom(1.0)
            .region_zoom(2.0)
            .ocr_engine(Arc::new(ocr::NoOcr))
            .build()
            .unwrap();

        let out = run_pipeline(vec![red_ruled_page(0)], Some(Vec::new()), &config, Vec::new())
            .await
            .unwrap();

        assert!(out.questions.is_empty());
        assert_eq!(out.stats.regions_extracted, 0);
    }
}
