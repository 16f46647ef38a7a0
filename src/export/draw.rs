//! Bounding box overlays.

use image::{DynamicImage, Rgb, RgbImage};

use crate::value::BoundingBox;

/// Ground-truth box color.
pub const GROUND_TRUTH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Predicted box color.
pub const PREDICTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 2;

/// Convert to RGB so overlays have a color channel to draw into.
pub(crate) fn overlay_canvas(img: &DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Draw box outlines given in normalized coordinates.
pub(crate) fn draw_boxes<'a>(
    canvas: &mut RgbImage,
    boxes: impl IntoIterator<Item = &'a BoundingBox>,
    color: Rgb<u8>,
) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    for b in boxes {
        let (x0, x1) = ordered(to_pixel(b[0], w), to_pixel(b[2], w));
        let (y0, y1) = ordered(to_pixel(b[1], h), to_pixel(b[3], h));

        for t in 0..BOX_THICKNESS {
            let top = (y0 + t).min(y1);
            let bottom = y1.saturating_sub(t).max(y0);
            let left = (x0 + t).min(x1);
            let right = x1.saturating_sub(t).max(x0);

            for x in x0..=x1 {
                canvas.put_pixel(x, top, color);
                canvas.put_pixel(x, bottom, color);
            }
            for y in y0..=y1 {
                canvas.put_pixel(left, y, color);
                canvas.put_pixel(right, y, color);
            }
        }
    }
}

fn to_pixel(v: f32, extent: u32) -> u32 {
    let max = extent - 1;
    if v.is_nan() {
        return 0;
    }
    ((v.clamp(0.0, 1.0) * max as f32).round() as u32).min(max)
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b { (a, b) } else { (b, a) }
}
