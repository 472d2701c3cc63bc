//! Vertical stitching of region images into one composite per question.
//!
//! The composite is as wide as the first input and as tall as all inputs
//! together; inputs are pasted top to bottom with no gaps. Inputs of a
//! different width are pasted as they are (left-aligned, clipped or padded
//! with white) and reported, never rescaled: a width mismatch means the
//! blue bounding rectangle moved between pages, which an operator should see.

use crate::error::{Diagnostic, StitchError};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A stitched composite and the widths that did not match.
#[derive(Debug, Clone)]
pub struct Stitched {
    pub image: DynamicImage,
    /// `(input index, width)` for every input narrower or wider than input 0.
    pub width_mismatches: Vec<(usize, u32)>,
}

impl Stitched {
    /// One [`Diagnostic::GeometryMismatch`] per mismatching input.
    pub fn diagnostics(&self, context: &str) -> Vec<Diagnostic> {
        let width = self.image.width();
        self.width_mismatches
            .iter()
            .map(|(index, w)| Diagnostic::GeometryMismatch {
                detail: format!("{context}: fragment {index} is {w} px wide, expected {width} px"),
            })
            .collect()
    }
}

/// Stitch images top to bottom on a white canvas.
pub fn stitch_regions(images: &[DynamicImage]) -> Result<Stitched, StitchError> {
    let first = images.first().ok_or(StitchError::Empty)?;
    let width = first.width();
    let height: u32 = images.iter().map(DynamicImage::height).sum();

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut width_mismatches = Vec::new();
    let mut y: i64 = 0;

    for (index, img) in images.iter().enumerate() {
        if img.width() != width {
            warn!(
                "Stitch: fragment {} is {} px wide, expected {} px",
                index,
                img.width(),
                width
            );
            width_mismatches.push((index, img.width()));
        }
        imageops::replace(&mut canvas, &img.to_rgba8(), 0, y);
        y += i64::from(img.height());
    }

    debug!("Stitched {} fragments → {}x{}", images.len(), width, height);
    Ok(Stitched {
        image: DynamicImage::ImageRgba8(canvas),
        width_mismatches,
    })
}

/// A crop rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Crop each image to its rectangle (if any), then stitch.
///
/// Rectangles are clamped to their image; an image with no rectangle is
/// used whole.
pub fn stitch_cropped(
    pages: &[(DynamicImage, Option<CropRect>)],
) -> Result<Stitched, StitchError> {
    let cropped: Vec<DynamicImage> = pages
        .iter()
        .map(|(img, rect)| match rect {
            Some(r) => {
                let x = r.x.min(img.width().saturating_sub(1));
                let y = r.y.min(img.height().saturating_sub(1));
                let w = r.width.min(img.width() - x).max(1);
                let h = r.height.min(img.height() - y).max(1);
                img.crop_imm(x, y, w, h)
            }
            None => img.clone(),
        })
        .collect();
    stitch_regions(&cropped)
}
