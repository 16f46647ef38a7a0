use std::collections::HashSet;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};

use crate::error::InstrumentResult;
use crate::value::{Annotations, BoundingBox};

use super::draw::{draw_boxes, overlay_canvas, GROUND_TRUTH_COLOR, PREDICTION_COLOR};
use super::render::{as_image_view, save_png, tensor_to_image};
use super::{ExporterConfig, OutputDir};

/// Prediction boxes scoring below this are not drawn.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// One COCO-style box annotation.
///
/// `bbox` is `[x, y, w, h]` in the same coordinate space as the input boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub image_id: Option<i64>,
    pub category_id: i64,
    pub bbox: [f32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Convert label and prediction annotations to two COCO annotation lists.
///
/// Each side is independent: an absent side yields an empty list. Boxes are
/// paired with labels positionally; rows without a label are dropped.
/// Predictions take their image id from `y_i_pred`, falling back to `y_i`.
#[must_use]
pub fn coco_formatted_boxes(
    y_i: Option<&Annotations>,
    y_i_pred: Option<&Annotations>,
) -> (Vec<CocoAnnotation>, Vec<CocoAnnotation>) {
    coco_formatted_boxes_skipping(y_i, y_i_pred, &HashSet::new())
}

fn coco_formatted_boxes_skipping(
    y_i: Option<&Annotations>,
    y_i_pred: Option<&Annotations>,
    skip: &HashSet<i64>,
) -> (Vec<CocoAnnotation>, Vec<CocoAnnotation>) {
    let gt_image_id = y_i.and_then(|y| y.image_id);

    let ground_truth = y_i
        .map(|y| to_coco(y, gt_image_id, false, skip))
        .unwrap_or_default();

    let predicted = y_i_pred
        .map(|y| to_coco(y, y.image_id.or(gt_image_id), true, skip))
        .unwrap_or_default();

    (ground_truth, predicted)
}

fn to_coco(ann: &Annotations, image_id: Option<i64>, with_scores: bool, skip: &HashSet<i64>) -> Vec<CocoAnnotation> {
    let labels = ann.labels.as_deref().unwrap_or(&[]);
    ann.boxes()
        .iter()
        .zip(labels)
        .enumerate()
        .filter(|(_, (_, label))| !skip.contains(label))
        .map(|(k, (b, &category_id))| CocoAnnotation {
            image_id,
            category_id,
            bbox: xyxy_to_xywh(b),
            score: if with_scores {
                ann.scores.as_ref().and_then(|s| s.get(k).copied())
            } else {
                None
            },
        })
        .collect()
}

fn xyxy_to_xywh(b: &BoundingBox) -> [f32; 4] {
    [b[0], b[1], b[2] - b[0], b[3] - b[1]]
}

/// Writes detection images, optionally with box overlays.
#[derive(Debug, Clone)]
pub struct ObjectDetectionExporter {
    output: OutputDir,
    score_threshold: f32,
    classes_to_skip: HashSet<i64>,
}

impl ObjectDetectionExporter {
    #[must_use]
    pub fn new(base_output_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(&ExporterConfig::new(base_output_dir))
    }

    #[must_use]
    pub fn with_config(config: &ExporterConfig) -> Self {
        Self {
            output: OutputDir::new(config),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            classes_to_skip: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Labels left out of overlays and COCO output.
    #[must_use]
    pub fn classes_to_skip(mut self, classes: impl IntoIterator<Item = i64>) -> Self {
        self.classes_to_skip = classes.into_iter().collect();
        self
    }

    /// Render one image. With `with_boxes`, ground-truth boxes are drawn in
    /// red and predictions in white; either side may be absent.
    pub fn get_sample(
        &self,
        x: ArrayViewD<'_, f32>,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        with_boxes: bool,
    ) -> InstrumentResult<DynamicImage> {
        let img = tensor_to_image(as_image_view(&x)?)?;
        if !with_boxes || (y_i.is_none() && y_i_pred.is_none()) {
            return Ok(img);
        }

        let mut canvas = overlay_canvas(&img);
        if let Some(y) = y_i {
            draw_boxes(&mut canvas, self.kept_boxes(y, None), GROUND_TRUTH_COLOR);
        }
        if let Some(y) = y_i_pred {
            draw_boxes(&mut canvas, self.kept_boxes(y, Some(self.score_threshold)), PREDICTION_COLOR);
        }
        Ok(DynamicImage::ImageRgb8(canvas))
    }

    fn kept_boxes<'a>(&'a self, ann: &'a Annotations, threshold: Option<f32>) -> impl Iterator<Item = &'a BoundingBox> + 'a {
        ann.boxes().iter().enumerate().filter_map(move |(k, b)| {
            let label = ann.labels.as_ref().and_then(|l| l.get(k));
            if label.is_some_and(|l| self.classes_to_skip.contains(l)) {
                return None;
            }
            let score = ann.scores.as_ref().and_then(|s| s.get(k));
            match (threshold, score) {
                (Some(t), Some(&s)) if s < t => None,
                _ => Some(b),
            }
        })
    }

    /// Ground-truth and prediction COCO lists for one sample.
    #[must_use]
    pub fn get_coco_formatted_bounding_box_data(
        &self,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
    ) -> (Vec<CocoAnnotation>, Vec<CocoAnnotation>) {
        coco_formatted_boxes_skipping(y_i, y_i_pred, &self.classes_to_skip)
    }

    pub fn export(
        &mut self,
        x: ArrayViewD<'_, f32>,
        basename: &str,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        with_boxes: bool,
    ) -> InstrumentResult<Vec<PathBuf>> {
        let img = self.get_sample(x, y_i, y_i_pred, with_boxes)?;
        let path = self.output.file(&format!("{basename}.png"))?;
        save_png(&img, &path)?;
        Ok(vec![path])
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

    fn gt() -> Annotations {
        Annotations::new()
            .with_labels(vec![1])
            .with_boxes(vec![[0.0, 0.0, 1.0, 1.0]])
            .with_image_id(1)
    }

    fn pred(score: f32) -> Annotations {
        Annotations::new()
            .with_scores(vec![score])
            .with_labels(vec![1])
            .with_boxes(vec![[0.0, 0.0, 1.0, 1.0]])
    }

    #[test]
    fn test_coco_conversion() {
        let (gt_list, pred_list) = coco_formatted_boxes(Some(&gt()), Some(&pred(0.9)));
        assert_eq!(gt_list.len(), 1);
        assert_eq!(gt_list[0].bbox, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(gt_list[0].score, None);
        assert_eq!(pred_list[0].image_id, Some(1));
        assert_eq!(pred_list[0].score, Some(0.9));
    }

    #[test]
    fn test_coco_xywh() {
        let y = Annotations::new()
            .with_labels(vec![3])
            .with_boxes(vec![[0.25, 0.5, 0.75, 1.0]]);
        let (gt_list, _) = coco_formatted_boxes(Some(&y), None);
        assert_eq!(gt_list[0].bbox, [0.25, 0.5, 0.5, 0.5]);
        assert_eq!(gt_list[0].category_id, 3);
        assert_eq!(gt_list[0].image_id, None);
    }

    #[test]
    fn test_coco_absent_sides_are_empty() {
        let (a, b) = coco_formatted_boxes(None, None);
        assert!(a.is_empty() && b.is_empty());
        let (a, b) = coco_formatted_boxes(None, Some(&pred(1.0)));
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_classes_to_skip() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ObjectDetectionExporter::new(dir.path()).classes_to_skip([1]);
        let (a, b) = exporter.get_coco_formatted_bounding_box_data(Some(&gt()), Some(&pred(1.0)));
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_low_score_prediction_not_drawn() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ObjectDetectionExporter::new(dir.path());
        let x = ArrayD::<f32>::zeros(IxDyn(&[8, 8, 3]));

        let faint = exporter.get_sample(x.view(), None, Some(&pred(0.1)), true).unwrap().to_rgb8();
        assert_eq!(faint.get_pixel(0, 0).0, [0, 0, 0]);

        let strong = exporter.get_sample(x.view(), None, Some(&pred(0.9)), true).unwrap().to_rgb8();
        assert_eq!(*strong.get_pixel(0, 0), PREDICTION_COLOR);
    }

    #[test]
    fn test_ground_truth_only_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ObjectDetectionExporter::new(dir.path());
        let x = ArrayD::<f32>::zeros(IxDyn(&[8, 8, 3]));
        let img = exporter.get_sample(x.view(), Some(&gt()), None, true).unwrap().to_rgb8();
        assert_eq!(*img.get_pixel(7, 7), GROUND_TRUTH_COLOR);
    }

    #[test]
    fn test_without_boxes_flag_no_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ObjectDetectionExporter::new(dir.path());
        let x = ArrayD::<f32>::zeros(IxDyn(&[8, 8, 3]));
        let img = exporter.get_sample(x.view(), Some(&gt()), Some(&pred(1.0)), false).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
    }
}
