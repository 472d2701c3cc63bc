//! Pipeline tests over synthetic page bitmaps.
//!
//! Pages are drawn at zoom 1 (one pixel per page unit) with full-width
//! marker rules. OCR is faked by an engine that answers according to the
//! height of the region it is shown, so every interval gets known text.

use exam_slicer::error::OcrError;
use exam_slicer::{
    slice_bitmaps, Diagnostic, NodeKind, OcrEngine, PageBitmap, SliceConfig, SliceProgressCallback,
};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

const RED: Rgb<u8> = Rgb([220, 20, 20]);
const GREEN: Rgb<u8> = Rgb([20, 200, 20]);
const PURPLE: Rgb<u8> = Rgb([200, 20, 200]);
const BLUE: Rgb<u8> = Rgb([20, 20, 240]);

const WIDTH: u32 = 200;

/// A white page with a 4 px rule of `colour` at each `y`.
fn page(index: usize, height: u32, rules: &[(u32, Rgb<u8>)]) -> PageBitmap {
    let mut img = RgbImage::from_pixel(WIDTH, height, Rgb([255, 255, 255]));
    for &(y, colour) in rules {
        for yy in y..(y + 4).min(height) {
            for x in 0..WIDTH {
                img.put_pixel(x, yy, colour);
            }
        }
    }
    PageBitmap::new(index, 1.0, DynamicImage::ImageRgb8(img))
}

/// Draw two 5 px blue bars at `x0` and `x1 - 5`, full page height.
fn with_blue_bounds(mut p: PageBitmap, x0: u32, x1: u32) -> PageBitmap {
    let mut img = p.image.to_rgb8();
    for y in 0..img.height() {
        for x in (x0..x0 + 5).chain(x1 - 5..x1) {
            img.put_pixel(x, y, BLUE);
        }
    }
    p.image = DynamicImage::ImageRgb8(img);
    p
}

/// Answers by region height; unknown heights read as blank, listed
/// heights can be made to fail.
struct HeightOcr {
    texts: HashMap<u32, &'static str>,
    failing: Vec<u32>,
}

impl HeightOcr {
    fn new(texts: &[(u32, &'static str)]) -> Self {
        Self {
            texts: texts.iter().copied().collect(),
            failing: Vec::new(),
        }
    }

    fn failing_on(mut self, height: u32) -> Self {
        self.failing.push(height);
        self
    }
}

impl OcrEngine for HeightOcr {
    fn name(&self) -> &str {
        "height"
    }

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let h = image.height();
        if self.failing.contains(&h) {
            return Err(OcrError::Recognition(format!("cannot read {h}px region")));
        }
        Ok(self.texts.get(&h).copied().unwrap_or_default().to_string())
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows every band.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(ocr: HeightOcr) -> SliceConfig {
    SliceConfig::builder()
        .zoom(1.0)
        .region_zoom(1.0)
        .ocr_engine(Arc::new(ocr))
        .build()
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn red_green_purple_red_on_one_page_yields_one_root() {
    init_tracing();
    // Intervals: red 10–60 (50), green 60–120 (60), purple 120–200 (80);
    // the second red at 200 leaves a 40-unit tail on the last page.
    let p = page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]);
    let ocr = HeightOcr::new(&[
        (50, "3 A uniform beam rests on two supports."),
        (60, "(b) State the principle of moments. [2]"),
        (80, "sum of clockwise moments = sum of anticlockwise moments"),
    ]);

    let out = slice_bitmaps(vec![p], &config(ocr)).await.unwrap();

    assert_eq!(out.stats.bands_detected, 4);
    assert_eq!(out.stats.regions_extracted, 3);
    assert_eq!(out.questions.len(), 1);

    let root = &out.questions[0];
    assert_eq!(root.label, "3");
    assert_eq!(root.kind, NodeKind::Container);
    assert_eq!(root.marks, 2.0);
    assert_eq!(root.content_text, "3 A uniform beam rests on two supports.");
    let composite = root.content_image.as_ref().unwrap();
    assert_eq!(composite.dimensions(), (WIDTH, 190));

    assert_eq!(root.children.len(), 1);
    let part = &root.children[0];
    assert_eq!(part.label, "b");
    assert_eq!(part.marks, 2.0);
    assert!(part.is_leaf());
    assert_eq!(part.content_image.as_ref().unwrap().height(), 60);
    assert_eq!(
        part.answer_text.as_deref(),
        Some("sum of clockwise moments = sum of anticlockwise moments")
    );
    assert_eq!(part.answer_image.as_ref().unwrap().height(), 80);
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
}

#[tokio::test]
async fn part_runs_over_page_break() {
    init_tracing();
    let p0 = page(0, 300, &[(20, RED), (100, GREEN)]);
    let p1 = page(1, 310, &[(120, PURPLE), (220, RED)]);
    let ocr = HeightOcr::new(&[
        (80, "1 A car accelerates from rest."),
        (200, "(a) Sketch a graph"),
        (120, "of speed against time. [3]"),
        (100, "straight line through the origin"),
        (90, "2 Define density. (2 marks)"),
    ]);

    let out = slice_bitmaps(vec![p0, p1], &config(ocr)).await.unwrap();
    assert_eq!(out.questions.len(), 2);

    let q1 = &out.questions[0];
    assert_eq!(q1.label, "1");
    assert_eq!(q1.content_image.as_ref().unwrap().height(), 80 + 200 + 120 + 100);
    let a = &q1.children[0];
    assert_eq!(a.label, "a");
    assert_eq!(a.content_text, "(a) Sketch a graph\nof speed against time. [3]");
    assert_eq!(a.marks, 3.0);
    assert_eq!(a.content_image.as_ref().unwrap().height(), 320);
    assert_eq!(a.answer_text.as_deref(), Some("straight line through the origin"));

    let q2 = &out.questions[1];
    assert_eq!(q2.label, "2");
    assert_eq!(q2.kind, NodeKind::Leaf);
    assert_eq!(q2.marks, 2.0);
    assert_eq!(q2.order, 1);

    assert_eq!(out.total_marks(), 5.0);
}

#[tokio::test]
async fn blue_bounds_narrow_every_crop() {
    let p = with_blue_bounds(
        page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]),
        40,
        160,
    );
    let out = slice_bitmaps(vec![p], &config(HeightOcr::new(&[])))
        .await
        .unwrap();

    assert_eq!(out.questions.len(), 1);
    let root = &out.questions[0];
    // Grid hits at x = 40 and x = 155.
    assert_eq!(root.content_image.as_ref().unwrap().width(), 115);
    assert_eq!(root.children[0].content_image.as_ref().unwrap().width(), 115);
    // No OCR text: labels and marks fall back.
    assert_eq!(root.label, "1");
    assert_eq!(root.children[0].label, "a");
    assert_eq!(root.marks, 1.0);
}

#[tokio::test]
async fn green_before_any_red_is_dropped_with_diagnostic() {
    init_tracing();
    let p = page(0, 300, &[(10, GREEN), (100, RED), (180, GREEN)]);
    let ocr = HeightOcr::new(&[(80, "4 Waves"), (120, "(a) Define frequency [1]")]);

    let out = slice_bitmaps(vec![p], &config(ocr)).await.unwrap();

    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.questions[0].label, "4");
    assert_eq!(out.questions[0].children.len(), 1);
    assert!(matches!(
        out.diagnostics.as_slice(),
        [Diagnostic::DetectionAmbiguity { page: 1, .. }]
    ));
}

#[tokio::test]
async fn ocr_failure_degrades_to_defaults() {
    let p = page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]);
    let ocr = HeightOcr::new(&[(60, "(c) Explain [4]")]).failing_on(50);

    let out = slice_bitmaps(vec![p], &config(ocr)).await.unwrap();

    assert_eq!(out.stats.ocr_failures, 1);
    let root = &out.questions[0];
    assert_eq!(root.label, "1");
    assert_eq!(root.children[0].label, "c");
    assert_eq!(root.marks, 4.0);
    assert!(matches!(
        out.diagnostics.as_slice(),
        [Diagnostic::RecognitionFailure { page: 1, y, .. }] if *y == 10.0
    ));
}

#[tokio::test]
async fn progress_callback_sees_pages_and_regions() {
    #[derive(Default)]
    struct Counter {
        started: AtomicUsize,
        pages: AtomicUsize,
        regions: AtomicUsize,
        questions: AtomicUsize,
    }

    impl SliceProgressCallback for Counter {
        fn on_slice_start(&self, total_pages: usize) {
            self.started.store(total_pages, Ordering::SeqCst);
        }
        fn on_page_scanned(&self, _page_num: usize, _total: usize, _bands: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
        fn on_region_complete(&self, _index: usize, _total: usize, _text_len: usize) {
            self.regions.fetch_add(1, Ordering::SeqCst);
        }
        fn on_slice_complete(&self, questions: usize, _diagnostics: &[Diagnostic]) {
            self.questions.store(questions, Ordering::SeqCst);
        }
    }

    let counter = Arc::new(Counter::default());
    let config = SliceConfig::builder()
        .zoom(1.0)
        .region_zoom(1.0)
        .concurrency(2)
        .ocr_engine(Arc::new(HeightOcr::new(&[])))
        .progress_callback(counter.clone())
        .build()
        .unwrap();

    let pages = vec![
        page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]),
        page(1, 240, &[]),
    ];
    let out = slice_bitmaps(pages, &config).await.unwrap();

    assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    assert_eq!(counter.pages.load(Ordering::SeqCst), 2);
    // The short red tail on page 1 opens on page 2's top strip.
    assert_eq!(counter.regions.load(Ordering::SeqCst), 4);
    assert_eq!(counter.questions.load(Ordering::SeqCst), out.questions.len());
    assert_eq!(out.questions.len(), 2);
}

#[tokio::test]
async fn tree_survives_json_round_trip() {
    let p = page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]);
    let out = slice_bitmaps(vec![p], &config(HeightOcr::new(&[(50, "7 Heat")])))
        .await
        .unwrap();

    let json = serde_json::to_string(&out).unwrap();
    assert!(json.contains("data:image/png;base64,"));
    let back: exam_slicer::SliceOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(back.questions[0].label, "7");
    assert_eq!(
        back.questions[0].content_image.as_ref().unwrap().dimensions(),
        out.questions[0].content_image.as_ref().unwrap().dimensions()
    );
}

#[test]
fn slicing_blocks_outside_a_runtime() {
    let p = page(0, 240, &[(10, RED), (60, GREEN), (120, PURPLE), (200, RED)]);
    let out = tokio_test::block_on(slice_bitmaps(vec![p], &config(HeightOcr::new(&[]))))
        .unwrap();
    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.stats.regions_extracted, 3);
}
