//! Colour-marker detection: find the red / green / purple rules and the blue
//! bounding rectangle an operator drew on a page.
//!
//! ## Why sample instead of scanning every pixel?
//!
//! A page at zoom 2 is roughly 1200×1700 px. Marker rules span most of the
//! page width, so looking at every 10th pixel of every 2nd row finds them
//! just as reliably at a twentieth of the cost. The blue rectangle is a thin
//! outline rather than a filled rule, so it is located differently: a
//! bounding box over every matching pixel on a coarse grid.
//!
//! Detection is a pure function of the pixels and the parameters.

use crate::config::DetectionParams;
use crate::model::{ColorBand, ColorKind, HorizontalSpan, PageBitmap};
use image::RgbImage;
use std::borrow::Cow;
use tracing::debug;

const LINE_COLORS: [ColorKind; 3] = [ColorKind::Red, ColorKind::Green, ColorKind::Purple];

/// Detect every band on one page, ordered by ascending `y_position`.
///
/// Returns an empty list for blank pages. A Blue band, when present, sits at
/// the rectangle's top edge and carries its horizontal span; at equal `y` it
/// sorts before line bands.
pub fn detect_bands(page: &PageBitmap, params: &DetectionParams) -> Vec<ColorBand> {
    let rgb: Cow<'_, RgbImage> = match page.image.as_rgb8() {
        Some(buf) => Cow::Borrowed(buf),
        None => Cow::Owned(page.image.to_rgb8()),
    };
    if rgb.width() == 0 || rgb.height() == 0 {
        return Vec::new();
    }

    let zoom = page.zoom;
    let rows = scan_rows(&rgb, params)
        .into_iter()
        .map(|(y, kind)| (y as f32 / zoom, kind))
        .collect::<Vec<_>>();

    let mut bands = Vec::new();
    if let Some(rect) = blue_rectangle(&rgb, params) {
        bands.push(ColorBand {
            span: Some(HorizontalSpan {
                x_start: rect.min_x as f32 / zoom,
                x_end: rect.max_x as f32 / zoom,
            }),
            ..ColorBand::new(page.page_index, rect.min_y as f32 / zoom, ColorKind::Blue)
        });
    }
    bands.extend(merge_rows(page.page_index, &rows, params.merge_gap));
    bands.sort_by(|a, b| a.y_position.total_cmp(&b.y_position));

    debug!(
        "Page {}: {} bands ({} marked rows)",
        page.page_index + 1,
        bands.len(),
        rows.len()
    );
    bands
}

/// Classify sampled rows. Returns `(pixel_row, colour)` for every row whose
/// dominant marker colour exceeds the row threshold.
fn scan_rows(rgb: &RgbImage, params: &DetectionParams) -> Vec<(u32, ColorKind)> {
    let (width, height) = rgb.dimensions();
    let stride = params.sample_stride.max(1) as usize;
    let samples = (0..width).step_by(stride).count();
    let needed = params.row_threshold * samples as f32;

    let mut rows = Vec::new();
    for y in (0..height).step_by(params.row_step.max(1) as usize) {
        let mut counts = [0usize; 3];
        for x in (0..width).step_by(stride) {
            match params.thresholds.classify(rgb.get_pixel(x, y).0) {
                Some(ColorKind::Blue) | None => {}
                Some(kind) => counts[kind.slot()] += 1,
            }
        }
        if let Some(kind) = LINE_COLORS
            .into_iter()
            .find(|k| counts[k.slot()] as f32 > needed)
        {
            rows.push((y, kind));
        }
    }
    rows
}

/// Merge marked rows into bands.
///
/// A row joins the band of its colour when it lies within `gap` units of the
/// previous row of that colour; the band keeps the position of its first row.
/// Input rows must be in ascending `y`.
pub fn merge_rows(page_index: usize, rows: &[(f32, ColorKind)], gap: f32) -> Vec<ColorBand> {
    let mut last_row: [Option<f32>; 4] = [None; 4];
    let mut bands = Vec::new();

    for &(y, kind) in rows {
        let slot = kind.slot();
        let joins = last_row[slot].is_some_and(|prev| (y - prev).abs() <= gap);
        if !joins {
            bands.push(ColorBand::new(page_index, y, kind));
        }
        last_row[slot] = Some(y);
    }
    bands
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// Bounding box of blue pixels on a `blue_stride` grid. Degenerate boxes
/// (a single column or row of hits) are ignored.
fn blue_rectangle(rgb: &RgbImage, params: &DetectionParams) -> Option<PixelRect> {
    let (width, height) = rgb.dimensions();
    let stride = params.blue_stride.max(1) as usize;
    let mut rect: Option<PixelRect> = None;

    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            if params.thresholds.classify(rgb.get_pixel(x, y).0) != Some(ColorKind::Blue) {
                continue;
            }
            rect = Some(match rect {
                None => PixelRect {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(r) => PixelRect {
                    min_x: r.min_x.min(x),
                    min_y: r.min_y.min(y),
                    max_x: r.max_x.max(x),
                    max_y: r.max_y.max(y),
                },
            });
        }
    }

    rect.filter(|r| r.max_x > r.min_x && r.max_y > r.min_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};

    const RED: Rgb<u8> = Rgb([230, 20, 20]);
    const GREEN: Rgb<u8> = Rgb([20, 200, 20]);
    const BLUE: Rgb<u8> = Rgb([20, 20, 240]);

    fn blank(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    fn rule(img: &mut RgbImage, y: u32, thickness: u32, colour: Rgb<u8>) {
        for yy in y..y + thickness {
            for x in 0..img.width() {
                img.put_pixel(x, yy, colour);
            }
        }
    }

    fn page(img: RgbImage, zoom: f32) -> PageBitmap {
        PageBitmap::new(0, zoom, DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn blank_page_has_no_bands() {
        let bands = detect_bands(&page(blank(200, 300), 1.0), &DetectionParams::default());
        assert!(bands.is_empty());
    }

    #[test]
    fn thick_rule_is_one_band_at_first_row() {
        let mut img = blank(200, 300);
        rule(&mut img, 40, 6, RED);
        let bands = detect_bands(&page(img, 1.0), &DetectionParams::default());
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].color_kind, ColorKind::Red);
        assert_eq!(bands[0].y_position, 40.0);
    }

    #[test]
    fn positions_are_in_page_units() {
        let mut img = blank(400, 600);
        rule(&mut img, 120, 4, GREEN);
        let bands = detect_bands(&page(img, 2.0), &DetectionParams::default());
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].y_position, 60.0);
    }

    #[test]
    fn short_rule_below_threshold_is_ignored() {
        let mut img = blank(200, 100);
        // 40 of 200 px wide: 4 of 20 samples, under 30 %.
        for x in 0..40 {
            img.put_pixel(x, 50, RED);
            img.put_pixel(x, 51, RED);
        }
        assert!(detect_bands(&page(img, 1.0), &DetectionParams::default()).is_empty());
    }

    #[test]
    fn different_colours_close_together_stay_separate() {
        let mut img = blank(200, 300);
        rule(&mut img, 100, 2, GREEN);
        rule(&mut img, 104, 2, RED);
        let bands = detect_bands(&page(img, 1.0), &DetectionParams::default());
        let kinds: Vec<_> = bands.iter().map(|b| b.color_kind).collect();
        assert_eq!(kinds, vec![ColorKind::Green, ColorKind::Red]);
    }

    #[test]
    fn blue_rectangle_sets_span() {
        let mut img = blank(300, 300);
        for x in 50..=250 {
            img.put_pixel(x, 20, BLUE);
            img.put_pixel(x, 280, BLUE);
        }
        for y in 20..=280 {
            img.put_pixel(50, y, BLUE);
            img.put_pixel(250, y, BLUE);
        }
        let bands = detect_bands(&page(img, 1.0), &DetectionParams::default());
        let blue = bands
            .iter()
            .find(|b| b.color_kind == ColorKind::Blue)
            .expect("blue band");
        assert_eq!(blue.y_position, 20.0);
        assert_eq!(
            blue.span,
            Some(HorizontalSpan {
                x_start: 50.0,
                x_end: 250.0
            })
        );
    }

    #[test]
    fn merge_rows_chains_same_colour() {
        let rows = [
            (10.0, ColorKind::Red),
            (18.0, ColorKind::Red),
            (26.0, ColorKind::Red),
            (40.0, ColorKind::Red),
            (41.0, ColorKind::Green),
        ];
        let bands = merge_rows(2, &rows, 10.0);
        let got: Vec<_> = bands.iter().map(|b| (b.y_position, b.color_kind)).collect();
        assert_eq!(
            got,
            vec![
                (10.0, ColorKind::Red),
                (40.0, ColorKind::Red),
                (41.0, ColorKind::Green)
            ]
        );
        assert!(bands.iter().all(|b| b.page_index == 2));
    }
}
