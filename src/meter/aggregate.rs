use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::InstrumentResult;
use crate::value::Value;

use super::{ArgBuffer, MeterReport, MeterSummary, ProbeValues, Record};

/// Per-measurement metric over the meter's arguments, in declaration order.
pub type MetricFn = Box<dyn Fn(&[&Value]) -> InstrumentResult<f64> + Send>;

/// How per-measurement values collapse into a final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAggregation {
    Mean,
    Sum,
    Min,
    Max,
    Last,
}

impl FinalAggregation {
    /// `None` when there is nothing to aggregate.
    #[must_use]
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let out = match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Last => *values.last()?,
        };
        Some(out)
    }
}

/// Plain meter: applies a metric on every full set of arguments.
///
/// Each measurement is forwarded as a record unless `record_final_only` is
/// set; the optional final aggregation runs at finalize.
pub struct AggregateMeter {
    name: String,
    args: ArgBuffer,
    metric: MetricFn,
    final_aggregation: Option<FinalAggregation>,
    record_final_only: bool,
    measurements: Vec<f64>,
}

impl fmt::Debug for AggregateMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateMeter")
            .field("name", &self.name)
            .field("args", &self.args.names())
            .field("final_aggregation", &self.final_aggregation)
            .field("record_final_only", &self.record_final_only)
            .field("measurements", &self.measurements.len())
            .finish_non_exhaustive()
    }
}

impl AggregateMeter {
    pub fn new<I, S>(name: impl Into<String>, metric: MetricFn, probe_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let args = ArgBuffer::new(&name, probe_names.into_iter().map(Into::into).collect());
        Self {
            name,
            args,
            metric,
            final_aggregation: None,
            record_final_only: false,
            measurements: Vec::new(),
        }
    }

    #[must_use]
    pub const fn final_aggregation(mut self, aggregation: FinalAggregation) -> Self {
        self.final_aggregation = Some(aggregation);
        self
    }

    #[must_use]
    pub const fn record_final_only(mut self, record_final_only: bool) -> Self {
        self.record_final_only = record_final_only;
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
    pub fn measurements(&self) -> &[f64] {
        &self.measurements
    }

    pub fn update(&mut self, context: &Context, values: &ProbeValues) -> InstrumentResult<Vec<Record>> {
        let Some(args) = self.args.offer(values) else {
            return Ok(Vec::new());
        };
        let args: Vec<&Value> = args.iter().map(AsRef::as_ref).collect();
        let v = (self.metric)(&args)?;
        self.measurements.push(v);

        if self.record_final_only {
            Ok(Vec::new())
        } else {
            Ok(vec![Record::new(&self.name, context, serde_json::Value::from(v), false)])
        }
    }

    pub fn finalize(&mut self) -> InstrumentResult<MeterReport> {
        let value = self
            .final_aggregation
            .and_then(|agg| agg.apply(&self.measurements));
        tracing::info!(meter = %self.name, measurements = self.measurements.len(), ?value, "aggregate meter finalized");
        Ok(MeterReport::new(
            &self.name,
            MeterSummary::Aggregate {
                measurements: self.measurements.len(),
                value,
            },
            Vec::new(),
        ))
    }
}
