use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{ExportError, InstrumentResult, ValidationError};
use crate::export::Exporter;
use crate::value::{Annotations, Value};

use super::{file_safe_name, ArgBuffer, MeterReport, MeterSummary, ProbeValues};

/// What a repeated export for the same context does to earlier files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Every invocation writes new files with a running suffix.
    #[default]
    Increment,
    /// Repeated invocations reuse the same names, replacing earlier files.
    Overwrite,
}

impl fmt::Display for OverwriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Increment => "increment",
            Self::Overwrite => "overwrite",
        })
    }
}

impl FromStr for OverwriteMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increment" => Ok(Self::Increment),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ValidationError::UnsupportedOverwriteMode {
                mode: other.to_string(),
            }),
        }
    }
}

/// Export limits and naming policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMeterConfig {
    /// Cap on distinct contexts ever exported; `None` is unlimited.
    #[serde(default)]
    pub max_batches: Option<usize>,
    #[serde(default)]
    pub overwrite_mode: OverwriteMode,
}

impl ExportMeterConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_batches == Some(0) {
            return Err(ValidationError::InvalidConfig {
                reason: "max_batches must be at least 1 (use None for no limit)".to_string(),
            });
        }
        Ok(self)
    }
}

/// Counters reported when an export meter is finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Distinct contexts that produced files.
    pub batches_exported: usize,
    pub samples_exported: usize,
    pub files_written: usize,
    /// Measurements dropped by `max_batches`.
    pub skipped: usize,
}

/// Renders every sample of `x` through an exporter.
///
/// File names are `<meter>_<context>_ex_<i>` plus `_<n>` in increment mode,
/// where `n` counts earlier invocations for the same context. Suffixes
/// already present in the output directory are skipped, so a second run
/// into the same directory appends instead of replacing.
#[derive(Debug)]
pub struct ExportMeter {
    name: String,
    file_stem: String,
    exporter: Exporter,
    args: ArgBuffer,
    has_y: bool,
    has_y_pred: bool,
    config: ExportMeterConfig,
    invocations: HashMap<Context, usize>,
    summary: ExportSummary,
}

impl ExportMeter {
    pub fn new(
        name: impl Into<String>,
        exporter: impl Into<Exporter>,
        x_probe: &str,
        y_probe: Option<&str>,
        y_pred_probe: Option<&str>,
        config: ExportMeterConfig,
    ) -> Result<Self, ValidationError> {
        let config = config.validate()?;
        let name = name.into();

        let mut probes = vec![x_probe.to_string()];
        probes.extend(y_probe.map(str::to_string));
        probes.extend(y_pred_probe.map(str::to_string));

        Ok(Self {
            file_stem: file_safe_name(&name),
            args: ArgBuffer::new(&name, probes),
            name,
            exporter: exporter.into(),
            has_y: y_probe.is_some(),
            has_y_pred: y_pred_probe.is_some(),
            config,
            invocations: HashMap::new(),
            summary: ExportSummary::default(),
        })
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
    pub const fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.exporter.output_dir()
    }

    #[must_use]
    pub const fn config(&self) -> ExportMeterConfig {
        self.config
    }

    #[must_use]
    pub const fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    pub fn update(&mut self, context: &Context, values: &ProbeValues) -> InstrumentResult<()> {
        let Some(args) = self.args.offer(values) else {
            return Ok(());
        };
        let mut args = args.into_iter();
        let x = args.next().unwrap_or_else(|| Arc::new(Value::Null));
        let y = if self.has_y { args.next() } else { None };
        let y_pred = if self.has_y_pred { args.next() } else { None };

        let names = self.args.names();
        let x_name = &names[0];
        let Some(batch) = x.as_tensor().filter(|t| t.ndim() > 0) else {
            return Err(ValidationError::UnexpectedValueType {
                name: x_name.clone(),
                expected: "batched tensor",
            }
            .into());
        };
        let batch_size = batch.shape()[0];
        for (label, v) in [("y", &y), ("y_pred", &y_pred)] {
            if let Some(len) = v.as_deref().and_then(Value::batch_len) {
                if len != batch_size {
                    return Err(ValidationError::BatchSizeMismatch {
                        left: x_name.clone(),
                        left_len: batch_size,
                        right: label.to_string(),
                        right_len: len,
                    }
                    .into());
                }
            }
        }

        let key = context.file_key();
        let is_new = !self.invocations.contains_key(context);
        if is_new && self.config.max_batches.is_some_and(|max| self.invocations.len() >= max) {
            self.summary.skipped += 1;
            tracing::debug!(meter = %self.name, context = %key, "max_batches reached, skipping export");
            return Ok(());
        }

        let mut invocation = self.invocations.get(context).copied().unwrap_or(0);
        if self.config.overwrite_mode == OverwriteMode::Increment {
            let prefix = format!("{}_{key}_ex_0_", self.file_stem);
            invocation = next_free_suffix(self.exporter.output_dir(), &prefix, invocation)?;
        }

        let with_boxes = self.exporter.supports_boxes();
        let mut files = 0;
        for (i, x_i) in batch.axis_iter(Axis(0)).enumerate() {
            let basename = match self.config.overwrite_mode {
                OverwriteMode::Increment => format!("{}_{key}_ex_{i}_{invocation}", self.file_stem),
                OverwriteMode::Overwrite => format!("{}_{key}_ex_{i}", self.file_stem),
            };
            let y_i = annotation_at(y.as_deref(), i);
            let y_i_pred = annotation_at(y_pred.as_deref(), i);
            files += self.exporter.export(x_i, &basename, y_i, y_i_pred, with_boxes)?.len();
        }

        self.invocations.insert(context.clone(), invocation + 1);
        if is_new {
            self.summary.batches_exported += 1;
        }
        self.summary.samples_exported += batch_size;
        self.summary.files_written += files;
        tracing::info!(
            meter = %self.name,
            context = %key,
            invocation,
            samples = batch_size,
            files,
            dir = %self.exporter.output_dir().display(),
            "exported samples"
        );
        Ok(())
    }

    pub fn finalize(&mut self) -> InstrumentResult<MeterReport> {
        tracing::info!(
            meter = %self.name,
            batches = self.summary.batches_exported,
            files = self.summary.files_written,
            skipped = self.summary.skipped,
            "export meter finalized"
        );
        Ok(MeterReport::new(
            &self.name,
            MeterSummary::Export(self.summary.clone()),
            Vec::new(),
        ))
    }
}

/// Smallest suffix `n >= start` such that no file named `<prefix><n>.*` or
/// `<prefix><n>_*` exists in `dir`.
fn next_free_suffix(dir: &Path, prefix: &str, start: usize) -> InstrumentResult<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(start),
        Err(e) => return Err(ExportError::io(dir, e).into()),
    };

    let mut taken = HashSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| ExportError::io(dir, e))?;
        let name = entry.file_name();
        let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(prefix)) else {
            continue;
        };
        let digits = rest.split(['.', '_']).next().unwrap_or("");
        if digits.len() < rest.len() {
            if let Ok(n) = digits.parse::<usize>() {
                taken.insert(n);
            }
        }
    }

    let mut n = start;
    while taken.contains(&n) {
        n += 1;
    }
    Ok(n)
}

fn annotation_at(value: Option<&Value>, index: usize) -> Option<&Annotations> {
    value
        .and_then(Value::as_annotations)
        .and_then(|batch| batch.get(index))
}
