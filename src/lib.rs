//! # probehub - Instrumentation bus for evaluation pipelines
//!
//! probehub decouples the code that produces intermediate values (inputs,
//! labels, predictions) from the code that consumes them (metrics, sample
//! exports, result files).
//!
//! ## Core Concepts
//!
//! - **Probe**: A named emission point; `update` publishes named values
//! - **Hub**: Routes each `<probe>.<value>` name to interested meters and carries the run context
//! - **Meter**: A subscriber that measures, accumulates, or exports what it receives
//! - **Exporter**: Renders one raw sample (image, clip, satellite patch) to files
//!
//! ## Usage
//!
//! ```rust,ignore
//! use probehub::{ExportMeter, ExportMeterConfig, Hub, ImageClassificationExporter};
//!
//! let hub = Hub::new();
//! let meter = ExportMeter::new(
//!     "exports",
//!     ImageClassificationExporter::new("/tmp/run"),
//!     "scenario.x",
//!     None,
//!     None,
//!     ExportMeterConfig::default(),
//! )?;
//! hub.connect_meter(meter, true);
//!
//! let probe = hub.get_probe("scenario");
//! hub.set_context([("batch", 0)]);
//! probe.update([("x", batch_of_images)])?;
//! hub.finalize()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod export;
pub mod hub;
pub mod meter;
pub mod value;

// Re-export primary types at crate root for convenience
pub use context::{Context, ContextValue, BATCH_KEY};
pub use error::{ExportError, InstrumentError, InstrumentResult, ValidationError};
pub use export::{
    coco_formatted_boxes, CocoAnnotation, Exporter, ExporterConfig, ImageClassificationExporter,
    Modality, ObjectDetectionExporter, Sample, SampleOptions, So2SatExporter,
    VideoClassificationExporter, VideoTrackingExporter,
};
pub use hub::{get_hub, get_probe, Hub, MeterId, Probe, Writer};
pub use meter::{
    AggregateMeter, CocoBoxFormatMeter, ExportMeter, ExportMeterConfig, ExportSummary,
    probe_values, FinalAggregation, Meter, MeterReport, MeterSummary, MetricFn, OverwriteMode,
    PredictionMeter, PredictionSummary, ProbeValues, Record,
};
pub use value::{Annotations, BoundingBox, Value};
