//! Answer-space compositing for grading review and operator preview.
//!
//! [`composite_answer_view`] pastes students' answer images onto a copy of
//! the question image at their answer-space offsets. Overlays paint in input
//! order, so a later overlay covers an earlier one where they overlap.
//! [`overlay_answer_spaces`] draws the answer spaces themselves as tinted
//! boxes so an operator can check their geometry.
//!
//! Both return an opaque RGB image flattened onto white, and neither
//! touches the base image passed in.

use crate::error::Diagnostic;
use crate::model::AnswerSpace;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use tracing::{debug, warn};

/// Fill of an answer-space placeholder (light blue, ~40 % opaque).
pub const PLACEHOLDER_FILL: Rgba<u8> = Rgba([173, 216, 230, 100]);
/// Outline of an answer-space placeholder (steel blue).
pub const PLACEHOLDER_OUTLINE: Rgba<u8> = Rgba([70, 130, 180, 200]);
const OUTLINE_WIDTH: u32 = 2;

/// An image to paste at a pixel offset of the base image.
#[derive(Debug, Clone)]
pub struct AnswerOverlay {
    pub x: i64,
    pub y: i64,
    pub image: DynamicImage,
}

/// A composite plus any overlay that did not fit inside the base image.
#[derive(Debug, Clone)]
pub struct CompositeView {
    pub image: DynamicImage,
    pub warnings: Vec<Diagnostic>,
}

/// Paste `overlays` onto a copy of `base`, alpha-blended, in list order.
///
/// Overlays reaching outside the base are clipped and reported as
/// [`Diagnostic::GeometryMismatch`].
pub fn composite_answer_view(base: &DynamicImage, overlays: &[AnswerOverlay]) -> CompositeView {
    let mut canvas = base.to_rgba8();
    let (bw, bh) = canvas.dimensions();
    let mut warnings = Vec::new();

    for (index, overlay) in overlays.iter().enumerate() {
        let (ow, oh) = (overlay.image.width(), overlay.image.height());
        let inside = overlay.x >= 0
            && overlay.y >= 0
            && overlay.x + i64::from(ow) <= i64::from(bw)
            && overlay.y + i64::from(oh) <= i64::from(bh);
        if !inside {
            let detail = format!(
                "overlay {index} ({ow}x{oh} at {},{}) exceeds base image {bw}x{bh}",
                overlay.x, overlay.y
            );
            warn!("{}", detail);
            warnings.push(Diagnostic::GeometryMismatch { detail });
        }
        imageops::overlay(&mut canvas, &overlay.image.to_rgba8(), overlay.x, overlay.y);
    }

    debug!("Composited {} overlays onto {}x{}", overlays.len(), bw, bh);
    CompositeView {
        image: flatten_on_white(&canvas),
        warnings,
    }
}

/// Draw every answer space as a translucent box on a transparent canvas.
pub fn render_answer_space_placeholders(
    width: u32,
    height: u32,
    spaces: &[AnswerSpace],
) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    for space in spaces {
        if space.width == 0 || space.height == 0 {
            continue;
        }
        let rect = Rect::at(space.x as i32, space.y as i32).of_size(space.width, space.height);
        draw_filled_rect_mut(&mut canvas, rect, PLACEHOLDER_FILL);
        for t in 0..OUTLINE_WIDTH {
            let (w, h) = (space.width.saturating_sub(2 * t), space.height.saturating_sub(2 * t));
            if w == 0 || h == 0 {
                break;
            }
            let inner = Rect::at((space.x + t) as i32, (space.y + t) as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, inner, PLACEHOLDER_OUTLINE);
        }
    }
    canvas
}

/// Blend answer-space placeholders over a question image.
pub fn overlay_answer_spaces(base: &DynamicImage, spaces: &[AnswerSpace]) -> DynamicImage {
    let mut canvas = base.to_rgba8();
    let boxes = render_answer_space_placeholders(canvas.width(), canvas.height(), spaces);
    imageops::overlay(&mut canvas, &boxes, 0, 0);
    flatten_on_white(&canvas)
}

/// Alpha-composite onto an opaque white background.
fn flatten_on_white(img: &RgbaImage) -> DynamicImage {
    let mut white = RgbaImage::from_pixel(img.width(), img.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut white, img, 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(white).to_rgb8())
}
