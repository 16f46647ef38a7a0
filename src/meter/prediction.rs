use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{InstrumentResult, ValidationError};
use crate::value::Value;

use super::{file_safe_name, write_json, ArgBuffer, MeterReport, MeterSummary, ProbeValues};

/// One captured `(y, y_pred)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub context: Context,
    pub index: usize,
    pub y: serde_json::Value,
    pub y_pred: serde_json::Value,
}

/// Aggregate statistics over every captured pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub batches: usize,
    pub samples: usize,
    /// Fraction of samples whose predicted class equals the label, over the
    /// samples where both could be read as class ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Captures ground truth and predictions per context.
#[derive(Debug)]
pub struct PredictionMeter {
    name: String,
    args: ArgBuffer,
    max_batches: Option<usize>,
    output_dir: Option<PathBuf>,
    batches: HashSet<Context>,
    records: Vec<PredictionRecord>,
    compared: usize,
    correct: usize,
}

impl PredictionMeter {
    pub fn new(name: impl Into<String>, y_probe: impl Into<String>, y_pred_probe: impl Into<String>) -> Self {
        let name = name.into();
        let args = ArgBuffer::new(&name, vec![y_probe.into(), y_pred_probe.into()]);
        Self {
            name,
            args,
            max_batches: None,
            output_dir: None,
            batches: HashSet::new(),
            records: Vec::new(),
            compared: 0,
            correct: 0,
        }
    }

    /// Stop capturing after this many distinct contexts.
    #[must_use]
    pub const fn max_batches(mut self, max_batches: Option<usize>) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Write `<name>_predictions.json` here on finalize.
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
    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn update(&mut self, context: &Context, values: &ProbeValues) -> InstrumentResult<()> {
        let Some(args) = self.args.offer(values) else {
            return Ok(());
        };
        let [y, y_pred] = args.as_slice() else {
            return Err(crate::error::InstrumentError::internal("prediction meter expects two arguments"));
        };

        let names = self.args.names();
        let y_len = batch_len(&names[0], y)?;
        let pred_len = batch_len(&names[1], y_pred)?;
        if y_len != pred_len {
            return Err(ValidationError::BatchSizeMismatch {
                left: names[0].clone(),
                left_len: y_len,
                right: names[1].clone(),
                right_len: pred_len,
            }
            .into());
        }

        if !self.batches.contains(context) {
            if self.max_batches.is_some_and(|max| self.batches.len() >= max) {
                tracing::debug!(meter = %self.name, context = %context.file_key(), "max_batches reached, skipping");
                return Ok(());
            }
            self.batches.insert(context.clone());
        }

        for index in 0..y_len {
            let y_i = y.sample(index).unwrap_or(Value::Null);
            let y_i_pred = y_pred.sample(index).unwrap_or(Value::Null);

            if let (Some(label), Some(pred)) = (class_id(&y_i), predicted_class(&y_i_pred)) {
                self.compared += 1;
                if label == pred {
                    self.correct += 1;
                }
            }

            self.records.push(PredictionRecord {
                context: context.clone(),
                index,
                y: y_i.to_json(),
                y_pred: y_i_pred.to_json(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn summary(&self) -> PredictionSummary {
        PredictionSummary {
            batches: self.batches.len(),
            samples: self.records.len(),
            accuracy: (self.compared > 0).then(|| self.correct as f64 / self.compared as f64),
        }
    }

    pub fn finalize(&mut self) -> InstrumentResult<MeterReport> {
        let summary = self.summary();
        let mut files = Vec::new();
        if let Some(dir) = &self.output_dir {
            if !self.records.is_empty() {
                let file_name = format!("{}_predictions.json", file_safe_name(&self.name));
                files.push(write_json(dir, &file_name, &self.records)?);
            }
        }
        tracing::info!(meter = %self.name, samples = summary.samples, accuracy = ?summary.accuracy, "prediction meter finalized");
        Ok(MeterReport::new(&self.name, MeterSummary::Prediction(summary), files))
    }
}

fn batch_len(name: &str, value: &Value) -> InstrumentResult<usize> {
    value.batch_len().ok_or_else(|| {
        ValidationError::UnexpectedValueType {
            name: name.to_string(),
            expected: "batched tensor or annotations",
        }
        .into()
    })
}

/// Class id from a scalar label.
fn class_id(v: &Value) -> Option<i64> {
    match v {
        Value::Tensor(t) if t.ndim() == 0 || t.len() == 1 => t.iter().next().map(|&c| c.round() as i64),
        Value::Int(c) => Some(*c),
        _ => None,
    }
}

/// Class id from a scalar prediction or the argmax of per-class scores.
fn predicted_class(v: &Value) -> Option<i64> {
    match v {
        Value::Tensor(t) if t.ndim() == 1 && t.len() > 1 => t
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (k, &s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((k, s)),
            })
            .and_then(|(k, _)| i64::try_from(k).ok()),
        other => class_id(other),
    }
}
