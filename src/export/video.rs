use std::path::{Path, PathBuf};

use image::DynamicImage;
use ndarray::{ArrayViewD, Axis};

use crate::error::InstrumentResult;
use crate::value::Annotations;

use super::draw::{draw_boxes, overlay_canvas, GROUND_TRUTH_COLOR, PREDICTION_COLOR};
use super::render::{as_image_view, save_gif, save_png, shape_error, tensor_to_image};
use super::{ExporterConfig, OutputDir};

/// Split a `T x H x W x C` clip into rendered frames.
fn frames(x: &ArrayViewD<'_, f32>) -> InstrumentResult<Vec<DynamicImage>> {
    if x.ndim() != 4 {
        return Err(shape_error("T x H x W x C video", x.shape()));
    }
    x.axis_iter(Axis(0))
        .map(|frame| tensor_to_image(as_image_view(&frame)?))
        .collect()
}

/// Write `<basename>.gif` followed by `<basename>_frame_<t>.png` for every
/// frame `t`.
fn write_clip(
    output: &mut OutputDir,
    frames: &[DynamicImage],
    frame_rate: u32,
    basename: &str,
) -> InstrumentResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(frames.len() + 1);
    let clip = output.file(&format!("{basename}.gif"))?;
    save_gif(frames, frame_rate, &clip)?;
    written.push(clip);
    for (t, frame) in frames.iter().enumerate() {
        let path = output.file(&format!("{basename}_frame_{t}.png"))?;
        save_png(frame, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Writes video clips as animated GIFs plus per-frame stills, without
/// overlays.
#[derive(Debug, Clone)]
pub struct VideoClassificationExporter {
    output: OutputDir,
    frame_rate: u32,
}

impl VideoClassificationExporter {
    #[must_use]
    pub fn new(base_output_dir: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self::with_config(&ExporterConfig::new(base_output_dir), frame_rate)
    }

    #[must_use]
    pub fn with_config(config: &ExporterConfig, frame_rate: u32) -> Self {
        Self {
            output: OutputDir::new(config),
            frame_rate,
        }
    }

    #[must_use]
    pub const fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// One image per input frame, in order.
    pub fn get_sample(&self, x: ArrayViewD<'_, f32>) -> InstrumentResult<Vec<DynamicImage>> {
        frames(&x)
    }

    pub fn export(&mut self, x: ArrayViewD<'_, f32>, basename: &str) -> InstrumentResult<Vec<PathBuf>> {
        let frames = self.get_sample(x)?;
        write_clip(&mut self.output, &frames, self.frame_rate, basename)
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }
}

/// Writes video clips with per-frame box overlays, as an animated GIF plus
/// per-frame stills.
///
/// Row `t` of the annotation boxes is drawn on frame `t`.
#[derive(Debug, Clone)]
pub struct VideoTrackingExporter {
    output: OutputDir,
    frame_rate: u32,
}

impl VideoTrackingExporter {
    #[must_use]
    pub fn new(base_output_dir: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self::with_config(&ExporterConfig::new(base_output_dir), frame_rate)
    }

    #[must_use]
    pub fn with_config(config: &ExporterConfig, frame_rate: u32) -> Self {
        Self {
            output: OutputDir::new(config),
            frame_rate,
        }
    }

    #[must_use]
    pub const fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn get_sample(
        &self,
        x: ArrayViewD<'_, f32>,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        with_boxes: bool,
    ) -> InstrumentResult<Vec<DynamicImage>> {
        let frames = frames(&x)?;
        if !with_boxes || (y_i.is_none() && y_i_pred.is_none()) {
            return Ok(frames);
        }

        let overlaid = frames
            .iter()
            .enumerate()
            .map(|(t, frame)| {
                let mut canvas = overlay_canvas(frame);
                if let Some(b) = y_i.and_then(|y| y.boxes().get(t)) {
                    draw_boxes(&mut canvas, [b], GROUND_TRUTH_COLOR);
                }
                if let Some(b) = y_i_pred.and_then(|y| y.boxes().get(t)) {
                    draw_boxes(&mut canvas, [b], PREDICTION_COLOR);
                }
                DynamicImage::ImageRgb8(canvas)
            })
            .collect();
        Ok(overlaid)
    }

    pub fn export(
        &mut self,
        x: ArrayViewD<'_, f32>,
        basename: &str,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        with_boxes: bool,
    ) -> InstrumentResult<Vec<PathBuf>> {
        let frames = self.get_sample(x, y_i, y_i_pred, with_boxes)?;
        write_clip(&mut self.output, &frames, self.frame_rate, basename)
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn clip(frames: usize) -> ArrayD<f32> {
        ArrayD::<f32>::zeros(IxDyn(&[frames, 6, 6, 3]))
    }

    #[test]
    fn test_frame_count_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = VideoClassificationExporter::new(dir.path(), 10);
        assert_eq!(exporter.get_sample(clip(5).view()).unwrap().len(), 5);
    }

    #[test]
    fn test_tracking_boxes_follow_frame_index() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = VideoTrackingExporter::new(dir.path(), 10);
        // Box only on frame 0; frame 1 has no row.
        let y = Annotations::new().with_boxes(vec![[0.0, 0.0, 1.0, 1.0]]);

        let frames = exporter.get_sample(clip(2).view(), Some(&y), None, true).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(*frames[0].to_rgb8().get_pixel(0, 0), GROUND_TRUTH_COLOR);
        assert_eq!(frames[1].to_rgb8().get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_tracking_rejects_single_image() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = VideoTrackingExporter::new(dir.path(), 10);
        let x = ArrayD::<f32>::zeros(IxDyn(&[6, 6, 3]));
        assert!(exporter.get_sample(x.view(), None, None, true).unwrap_err().is_validation());
    }

    #[test]
    fn test_export_writes_gif_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = VideoClassificationExporter::new(dir.path(), 5);
        let written = exporter.export(clip(3).view(), "clip").unwrap();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|p| p.exists()));
        assert_eq!(written[0].extension().unwrap(), "gif");
        for t in 0..3 {
            assert!(exporter.output_dir().join(format!("clip_frame_{t}.png")).exists());
        }
    }

    #[test]
    fn test_tracking_export_writes_overlaid_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = VideoTrackingExporter::new(dir.path(), 10);
        let y = Annotations::new().with_boxes(vec![[0.0, 0.0, 1.0, 1.0]; 2]);
        let written = exporter.export(clip(2).view(), "track", Some(&y), None, true).unwrap();
        assert_eq!(written.len(), 3);

        let frame = ::image::open(exporter.output_dir().join("track_frame_1.png")).unwrap();
        assert_eq!(*frame.to_rgb8().get_pixel(0, 0), GROUND_TRUTH_COLOR);
    }
}
