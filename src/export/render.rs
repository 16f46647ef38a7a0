//! Tensor to image conversion and sample encoding.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{
    Delay, DynamicImage, Frame, GrayImage, ImageBuffer, ImageError, ImageFormat, Luma, Rgb,
    RgbImage, Rgba, RgbaImage,
};
use ndarray::{ArrayView2, ArrayView3, ArrayViewD, Axis, Ix2, Ix3};

use crate::error::{ExportError, InstrumentError, InstrumentResult, ValidationError};

/// View `x` as an `H x W x C` image, promoting `H x W` to one channel.
pub(crate) fn as_image_view<'a>(x: &ArrayViewD<'a, f32>) -> InstrumentResult<ArrayView3<'a, f32>> {
    let view = x.clone();
    match view.ndim() {
        2 => {
            let plane = view
                .into_dimensionality::<Ix2>()
                .map_err(|_| shape_error("H x W x C image", x.shape()))?;
            Ok(plane.insert_axis(Axis(2)))
        }
        3 => view
            .into_dimensionality::<Ix3>()
            .map_err(|_| shape_error("H x W x C image", x.shape())),
        _ => Err(shape_error("H x W x C image", x.shape())),
    }
}

pub(crate) fn shape_error(expected: &str, actual: &[usize]) -> InstrumentError {
    ValidationError::ShapeMismatch {
        expected: expected.to_string(),
        actual: actual.to_vec(),
    }
    .into()
}

/// Convert a float image with values in `[0, 1]` to an 8-bit image.
///
/// Values outside the range are clipped. 1, 3 and 4 channels map to
/// grayscale, RGB and RGBA.
pub(crate) fn tensor_to_image(x: ArrayView3<'_, f32>) -> InstrumentResult<DynamicImage> {
    let (h, w, c) = x.dim();
    let (width, height) = dims_u32(w, h, x.shape())?;

    let (lo, hi) = x
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo < 0.0 || hi > 1.0 {
        tracing::warn!(min = lo, max = hi, "image values outside [0, 1] will be clipped");
    }

    let px = |row: u32, col: u32, ch: usize| to_u8(x[[row as usize, col as usize, ch]]);
    let img = match c {
        1 => DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |col, row| Luma([px(row, col, 0)]))),
        3 => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |col, row| {
            Rgb([px(row, col, 0), px(row, col, 1), px(row, col, 2)])
        })),
        4 => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |col, row| {
            Rgba([px(row, col, 0), px(row, col, 1), px(row, col, 2), px(row, col, 3)])
        })),
        _ => return Err(shape_error("image with 1, 3 or 4 channels", x.shape())),
    };
    Ok(img)
}

/// Render one `[0, 1]` plane as a grayscale image.
pub(crate) fn plane_to_gray(plane: ArrayView2<'_, f32>) -> InstrumentResult<DynamicImage> {
    let (h, w) = plane.dim();
    let (width, height) = dims_u32(w, h, plane.shape())?;
    let img: GrayImage = ImageBuffer::from_fn(width, height, |col, row| {
        Luma([to_u8(plane[[row as usize, col as usize]])])
    });
    Ok(DynamicImage::ImageLuma8(img))
}

fn dims_u32(w: usize, h: usize, shape: &[usize]) -> InstrumentResult<(u32, u32)> {
    match (u32::try_from(w), u32::try_from(h)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(shape_error("non-empty image", shape)),
    }
}

fn to_u8(v: f32) -> u8 {
    // NaN saturates to 0.
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

pub(crate) fn save_png(img: &DynamicImage, path: &Path) -> InstrumentResult<()> {
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| image_error(path, e))
}

/// Write frames as a looping animated GIF.
pub(crate) fn save_gif(frames: &[DynamicImage], frame_rate: u32, path: &Path) -> InstrumentResult<()> {
    let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| image_error(path, e))?;

    let delay = Delay::from_numer_denom_ms(1000, frame_rate.max(1));
    for img in frames {
        encoder
            .encode_frame(Frame::from_parts(img.to_rgba8(), 0, 0, delay))
            .map_err(|e| image_error(path, e))?;
    }
    Ok(())
}

fn image_error(path: &Path, err: ImageError) -> InstrumentError {
    match err {
        ImageError::IoError(source) => ExportError::io(path, source).into(),
        source => ExportError::Encode {
            path: path.to_path_buf(),
            source,
        }
        .into(),
    }
}
