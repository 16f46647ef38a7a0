use std::collections::HashSet;
use std::path::PathBuf;

use crate::context::Context;
use crate::error::{InstrumentResult, ValidationError};
use crate::export::{coco_formatted_boxes, CocoAnnotation, ObjectDetectionExporter};
use crate::value::{Annotations, Value};

use super::{file_safe_name, write_json, ArgBuffer, MeterReport, MeterSummary, ProbeValues};

/// Reshapes detection/tracking annotations into COCO-style lists.
///
/// Ground truth and predictions accumulate independently; a meter wired to
/// only one side leaves the other list empty.
#[derive(Debug)]
pub struct CocoBoxFormatMeter {
    name: String,
    args: ArgBuffer,
    has_y: bool,
    has_y_pred: bool,
    exporter: Option<ObjectDetectionExporter>,
    max_batches: Option<usize>,
    output_dir: Option<PathBuf>,
    batches: HashSet<Context>,
    ground_truth: Vec<CocoAnnotation>,
    predicted: Vec<CocoAnnotation>,
}

impl CocoBoxFormatMeter {
    /// At least one of `y_probe` and `y_pred_probe` is required.
    pub fn new(
        name: impl Into<String>,
        y_probe: Option<&str>,
        y_pred_probe: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let probes: Vec<String> = y_probe.iter().chain(y_pred_probe.iter()).map(|s| (*s).to_string()).collect();
        if probes.is_empty() {
            return Err(ValidationError::MissingField {
                field: "y_probe or y_pred_probe".to_string(),
            });
        }
        Ok(Self {
            args: ArgBuffer::new(&name, probes),
            name,
            has_y: y_probe.is_some(),
            has_y_pred: y_pred_probe.is_some(),
            exporter: None,
            max_batches: None,
            output_dir: None,
            batches: HashSet::new(),
            ground_truth: Vec::new(),
            predicted: Vec::new(),
        })
    }

    /// Use the exporter's conversion (and its skipped classes).
    #[must_use]
    pub fn exporter(mut self, exporter: ObjectDetectionExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    #[must_use]
    pub const fn max_batches(mut self, max_batches: Option<usize>) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Write both lists as JSON here on finalize.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn probe_names(&self) -> &[String] {
        self.args.names()
    }

    #[must_use]
    pub fn ground_truth(&self) -> &[CocoAnnotation] {
        &self.ground_truth
    }

    #[must_use]
    pub fn predicted(&self) -> &[CocoAnnotation] {
        &self.predicted
    }

    pub fn update(&mut self, context: &Context, values: &ProbeValues) -> InstrumentResult<()> {
        let Some(args) = self.args.offer(values) else {
            return Ok(());
        };

        let mut args = args.into_iter();
        let y = if self.has_y { args.next() } else { None };
        let y_pred = if self.has_y_pred { args.next() } else { None };

        let names = self.args.names();
        let y_batch = y.as_ref().map(|v| annotations(&names[0], v)).transpose()?;
        let pred_name = names.last().map_or("y_pred", String::as_str);
        let pred_batch = y_pred.as_ref().map(|v| annotations(pred_name, v)).transpose()?;

        let len = match (y_batch, pred_batch) {
            (Some(a), Some(b)) if a.len() != b.len() => {
                return Err(ValidationError::BatchSizeMismatch {
                    left: names[0].clone(),
                    left_len: a.len(),
                    right: pred_name.to_string(),
                    right_len: b.len(),
                }
                .into());
            }
            (Some(a), _) => a.len(),
            (None, Some(b)) => b.len(),
            (None, None) => 0,
        };

        if !self.batches.contains(context) {
            if self.max_batches.is_some_and(|max| self.batches.len() >= max) {
                return Ok(());
            }
            self.batches.insert(context.clone());
        }

        for i in 0..len {
            let y_i = y_batch.and_then(|b| b.get(i));
            let y_i_pred = pred_batch.and_then(|b| b.get(i));
            let (gt, pred) = match &self.exporter {
                Some(e) => e.get_coco_formatted_bounding_box_data(y_i, y_i_pred),
                None => coco_formatted_boxes(y_i, y_i_pred),
            };
            self.ground_truth.extend(gt);
            self.predicted.extend(pred);
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> InstrumentResult<MeterReport> {
        let mut files = Vec::new();
        if let Some(dir) = &self.output_dir {
            let stem = file_safe_name(&self.name);
            if self.has_y {
                files.push(write_json(dir, &format!("{stem}_ground_truth_boxes_coco_format.json"), &self.ground_truth)?);
            }
            if self.has_y_pred {
                files.push(write_json(dir, &format!("{stem}_predicted_boxes_coco_format.json"), &self.predicted)?);
            }
        }
        tracing::info!(
            meter = %self.name,
            ground_truth = self.ground_truth.len(),
            predicted = self.predicted.len(),
            "coco box meter finalized"
        );
        Ok(MeterReport::new(
            &self.name,
            MeterSummary::CocoBoxes {
                ground_truth: self.ground_truth.clone(),
                predicted: self.predicted.clone(),
            },
            files,
        ))
    }
}

fn annotations<'a>(name: &str, value: &'a Value) -> InstrumentResult<&'a [Annotations]> {
    value.as_annotations().ok_or_else(|| {
        ValidationError::UnexpectedValueType {
            name: name.to_string(),
            expected: "annotations",
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::probe_values;

    fn gt(image_id: i64) -> Annotations {
        Annotations::new()
            .with_boxes(vec![[0.0, 0.0, 0.5, 0.5]])
            .with_labels(vec![2])
            .with_image_id(image_id)
    }

    fn pred() -> Annotations {
        Annotations::new()
            .with_boxes(vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]])
            .with_labels(vec![2, 3])
            .with_scores(vec![0.9, 0.4])
    }

    fn ctx() -> Context {
        [("batch", 0)].into_iter().collect()
    }

    #[test]
    fn test_both_sides() {
        let mut meter = CocoBoxFormatMeter::new("coco", Some("s.y"), Some("s.y_pred")).unwrap();
        let values = probe_values([("s.y", vec![gt(10), gt(11)]), ("s.y_pred", vec![pred(), pred()])]);
        meter.update(&ctx(), &values).unwrap();

        assert_eq!(meter.ground_truth().len(), 2);
        assert_eq!(meter.predicted().len(), 4);
        assert_eq!(meter.predicted()[2].image_id, Some(11));
        assert_eq!(meter.predicted()[1].score, Some(0.4));
    }

    #[test]
    fn test_prediction_only_leaves_ground_truth_empty() {
        let mut meter = CocoBoxFormatMeter::new("coco", None, Some("s.y_pred")).unwrap();
        let values = probe_values([("s.y_pred", vec![pred()])]);
        meter.update(&ctx(), &values).unwrap();
        assert!(meter.ground_truth().is_empty());
        assert_eq!(meter.predicted().len(), 2);
    }

    #[test]
    fn test_requires_a_probe() {
        assert!(CocoBoxFormatMeter::new("coco", None, None).is_err());
    }

    #[test]
    fn test_rejects_tensor_input() {
        let mut meter = CocoBoxFormatMeter::new("coco", Some("s.y"), None).unwrap();
        let values = probe_values([("s.y", 1_i64)]);
        assert!(meter.update(&ctx(), &values).unwrap_err().is_validation());
    }

    #[test]
    fn test_finalize_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut meter = CocoBoxFormatMeter::new("coco", Some("s.y"), Some("s.y_pred"))
            .unwrap()
            .output_dir(dir.path());
        let report = meter.finalize().unwrap();
        assert_eq!(report.files.len(), 2);
        assert!(report.files.iter().all(|p| p.exists()));
    }
}
