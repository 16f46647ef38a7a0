//! Meters: subscribers that consume dispatched values.
//!
//! Every meter declares the full probe value names it consumes (for example
//! `scenario.x`). Values for those arguments are buffered until each one has
//! arrived for the current round, then the meter measures once and clears the
//! buffer. A producer may therefore publish `x` and `y_pred` from separate
//! probe updates, while a single update carrying all of them measures
//! immediately.

mod aggregate;
mod coco;
mod export;
mod prediction;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{ExportError, InstrumentResult};
use crate::export::CocoAnnotation;
use crate::value::Value;

pub use aggregate::{AggregateMeter, FinalAggregation, MetricFn};
pub use coco::CocoBoxFormatMeter;
pub use export::{ExportMeter, ExportMeterConfig, ExportSummary, OverwriteMode};
pub use prediction::{PredictionMeter, PredictionRecord, PredictionSummary};

/// Values delivered to a meter, keyed by full probe value name.
///
/// Payloads are shared: one update fanned out to several meters does not copy
/// tensor data.
pub type ProbeValues = BTreeMap<String, Arc<Value>>;

/// Build a [`ProbeValues`] map from owned values.
pub fn probe_values<K, V, I>(values: I) -> ProbeValues
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    values
        .into_iter()
        .map(|(k, v)| (k.into(), Arc::new(v.into())))
        .collect()
}

/// Whether `full_name` falls under a declared name: equal, or nested below it.
#[must_use]
pub fn name_matches(declared: &str, full_name: &str) -> bool {
    full_name == declared
        || full_name
            .strip_prefix(declared)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// A result record handed to writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub meter: String,
    pub context: Context,
    pub value: serde_json::Value,
    pub is_final: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Record {
    pub(crate) fn new(meter: &str, context: &Context, value: serde_json::Value, is_final: bool) -> Self {
        Self {
            meter: meter.to_string(),
            context: context.clone(),
            value,
            is_final,
            recorded_at: Utc::now(),
        }
    }
}

/// Variant-specific outcome of finalizing a meter.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeterSummary {
    Aggregate {
        measurements: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
    Prediction(PredictionSummary),
    CocoBoxes {
        ground_truth: Vec<CocoAnnotation>,
        predicted: Vec<CocoAnnotation>,
    },
    Export(ExportSummary),
}

/// Returned by [`Meter::finalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReport {
    pub meter: String,
    pub summary: MeterSummary,
    /// Files written during finalization.
    pub files: Vec<PathBuf>,
    pub finalized_at: DateTime<Utc>,
}

impl MeterReport {
    pub(crate) fn new(meter: &str, summary: MeterSummary, files: Vec<PathBuf>) -> Self {
        Self {
            meter: meter.to_string(),
            summary,
            files,
            finalized_at: Utc::now(),
        }
    }

    /// Value forwarded to writers as the meter's final record, if any.
    #[must_use]
    pub fn final_value(&self) -> Option<serde_json::Value> {
        match &self.summary {
            MeterSummary::Aggregate { value, .. } => value.map(serde_json::Value::from),
            MeterSummary::Prediction(s) => serde_json::to_value(s).ok(),
            MeterSummary::CocoBoxes { .. } | MeterSummary::Export(_) => None,
        }
    }
}

/// Closed set of meters the hub can drive.
#[derive(Debug)]
pub enum Meter {
    Aggregate(AggregateMeter),
    Prediction(PredictionMeter),
    CocoBoxFormat(CocoBoxFormatMeter),
    Export(ExportMeter),
}

impl Meter {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Aggregate(m) => m.name(),
            Self::Prediction(m) => m.name(),
            Self::CocoBoxFormat(m) => m.name(),
            Self::Export(m) => m.name(),
        }
    }

    /// Full probe value names this meter consumes.
    #[must_use]
    pub fn probe_names(&self) -> &[String] {
        match self {
            Self::Aggregate(m) => m.probe_names(),
            Self::Prediction(m) => m.probe_names(),
            Self::CocoBoxFormat(m) => m.probe_names(),
            Self::Export(m) => m.probe_names(),
        }
    }

    /// Whether a dispatched value name concerns this meter.
    #[must_use]
    pub fn is_interested(&self, full_name: &str) -> bool {
        self.probe_names().iter().any(|n| name_matches(n, full_name))
    }

    /// Consume one dispatch; returns records for writers.
    pub fn update(&mut self, context: &Context, values: &ProbeValues) -> InstrumentResult<Vec<Record>> {
        match self {
            Self::Aggregate(m) => m.update(context, values),
            Self::Prediction(m) => m.update(context, values).map(|()| Vec::new()),
            Self::CocoBoxFormat(m) => m.update(context, values).map(|()| Vec::new()),
            Self::Export(m) => m.update(context, values).map(|()| Vec::new()),
        }
    }

    /// Run-end flush.
    pub fn finalize(&mut self) -> InstrumentResult<MeterReport> {
        match self {
            Self::Aggregate(m) => m.finalize(),
            Self::Prediction(m) => m.finalize(),
            Self::CocoBoxFormat(m) => m.finalize(),
            Self::Export(m) => m.finalize(),
        }
    }

    #[must_use]
    pub const fn as_export(&self) -> Option<&ExportMeter> {
        match self {
            Self::Export(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_prediction(&self) -> Option<&PredictionMeter> {
        match self {
            Self::Prediction(m) => Some(m),
            _ => None,
        }
    }
}

impl From<AggregateMeter> for Meter {
    fn from(m: AggregateMeter) -> Self {
        Self::Aggregate(m)
    }
}

impl From<PredictionMeter> for Meter {
    fn from(m: PredictionMeter) -> Self {
        Self::Prediction(m)
    }
}

impl From<CocoBoxFormatMeter> for Meter {
    fn from(m: CocoBoxFormatMeter) -> Self {
        Self::CocoBoxFormat(m)
    }
}

impl From<ExportMeter> for Meter {
    fn from(m: ExportMeter) -> Self {
        Self::Export(m)
    }
}

/// Meter names become file-name fragments; anything outside `[A-Za-z0-9._-]`
/// collapses to `_`.
pub(crate) fn file_safe_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("file-name pattern is valid"));
    let cleaned = re.replace_all(name, "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "meter".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Serialize `value` as pretty JSON to `dir/file_name`, creating `dir`.
pub(crate) fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> InstrumentResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;
    let path = dir.join(file_name);
    let file = File::create(&path).map_err(|e| ExportError::io(&path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| ExportError::Serialize {
        path: path.clone(),
        source,
    })?;
    writer.flush().map_err(|e| ExportError::io(&path, e))?;
    Ok(path)
}

/// Buffers argument values until a full set has arrived.
#[derive(Debug, Clone)]
pub(crate) struct ArgBuffer {
    meter: String,
    names: Vec<String>,
    slots: Vec<Option<Arc<Value>>>,
}

impl ArgBuffer {
    pub(crate) fn new(meter: &str, names: Vec<String>) -> Self {
        let slots = vec![None; names.len()];
        Self {
            meter: meter.to_string(),
            names,
            slots,
        }
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    /// Take the matching values; once every slot is filled, return them in
    /// declaration order and reset.
    pub(crate) fn offer(&mut self, values: &ProbeValues) -> Option<Vec<Arc<Value>>> {
        for (name, slot) in self.names.iter().zip(self.slots.iter_mut()) {
            let found = values.get(name).or_else(|| {
                values
                    .iter()
                    .find(|(full, _)| name_matches(name, full))
                    .map(|(_, v)| v)
            });
            if let Some(v) = found {
                if slot.is_some() {
                    tracing::warn!(meter = %self.meter, arg = %name, "overwriting value not yet measured");
                }
                *slot = Some(Arc::clone(v));
            }
        }

        if self.slots.iter().all(Option::is_some) {
            Some(self.slots.iter_mut().filter_map(Option::take).collect())
        } else {
            None
        }
    }
}
