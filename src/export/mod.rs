//! Sample exporters.
//!
//! An exporter turns one raw input array, plus optional label and prediction
//! annotations, into a renderable [`Sample`], and writes samples into its own
//! output directory when driven by an [`ExportMeter`](crate::meter::ExportMeter).
//! Calling `get_sample` directly never touches the filesystem.
//!
//! The family is closed: [`Exporter`] enumerates every supported variant so
//! each variant's overlay policy is matched explicitly.

mod classification;
mod detection;
mod draw;
mod render;
mod so2sat;
mod video;

use std::fs;
use std::path::{Component, Path, PathBuf};

use ::image::DynamicImage;
use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, InstrumentResult, ValidationError};
use crate::value::Annotations;

pub use classification::ImageClassificationExporter;
pub use detection::{coco_formatted_boxes, CocoAnnotation, ObjectDetectionExporter};
pub use draw::{GROUND_TRUTH_COLOR, PREDICTION_COLOR};
pub use so2sat::{Modality, So2SatExporter, EO_BANDS, SO2SAT_CHANNELS};
pub use video::{VideoClassificationExporter, VideoTrackingExporter};

/// Subdirectory exporters create under the base output directory by default.
pub const DEFAULT_SUBDIR: &str = "saved_samples";

/// What an exporter produces for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// A single still image.
    Image(DynamicImage),
    /// Ordered frames or bands.
    Frames(Vec<DynamicImage>),
}

impl Sample {
    #[must_use]
    pub const fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    #[must_use]
    pub const fn is_frames(&self) -> bool {
        matches!(self, Self::Frames(_))
    }

    /// Number of images in the sample.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images().is_empty()
    }

    #[must_use]
    pub fn images(&self) -> &[DynamicImage] {
        match self {
            Self::Image(img) => std::slice::from_ref(img),
            Self::Frames(frames) => frames,
        }
    }

    #[must_use]
    pub fn into_images(self) -> Vec<DynamicImage> {
        match self {
            Self::Image(img) => vec![img],
            Self::Frames(frames) => frames,
        }
    }
}

/// Per-call rendering options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleOptions {
    /// Overlay boxes from the label/prediction annotations when supported.
    pub with_boxes: bool,
    /// So2Sat rendering mode (`vh`, `vv` or `eo`).
    pub modality: Option<String>,
}

impl SampleOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_boxes(mut self, with_boxes: bool) -> Self {
        self.with_boxes = with_boxes;
        self
    }

    #[must_use]
    pub fn modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }
}

/// Where an exporter writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Existing directory the run writes under.
    pub base_output_dir: PathBuf,
    /// Relative subdirectory owned by the exporter; empty writes into the base.
    #[serde(default = "default_subdir")]
    pub subdir: String,
}

fn default_subdir() -> String {
    DEFAULT_SUBDIR.to_string()
}

impl ExporterConfig {
    #[must_use]
    pub fn new(base_output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_output_dir: base_output_dir.into(),
            subdir: default_subdir(),
        }
    }

    #[must_use]
    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = subdir.into();
        self
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        let escapes = Path::new(&self.subdir)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ValidationError::InvalidConfig {
                reason: format!("exporter subdir must be a relative path inside the base dir (got '{}')", self.subdir),
            });
        }
        Ok(self)
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        if self.subdir.is_empty() {
            self.base_output_dir.clone()
        } else {
            self.base_output_dir.join(&self.subdir)
        }
    }
}

/// Output directory created lazily on first write.
#[derive(Debug, Clone)]
pub(crate) struct OutputDir {
    path: PathBuf,
    created: bool,
}

impl OutputDir {
    pub(crate) fn new(config: &ExporterConfig) -> Self {
        Self {
            path: config.output_dir(),
            created: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn ensure(&mut self) -> InstrumentResult<&Path> {
        if !self.created {
            fs::create_dir_all(&self.path).map_err(|e| ExportError::io(&self.path, e))?;
            self.created = true;
        }
        Ok(&self.path)
    }

    pub(crate) fn file(&mut self, name: &str) -> InstrumentResult<PathBuf> {
        Ok(self.ensure()?.join(name))
    }
}

/// Closed set of exporters.
#[derive(Debug, Clone)]
pub enum Exporter {
    ImageClassification(ImageClassificationExporter),
    ObjectDetection(ObjectDetectionExporter),
    VideoClassification(VideoClassificationExporter),
    VideoTracking(VideoTrackingExporter),
    So2Sat(So2SatExporter),
}

impl Exporter {
    /// Render one input without writing anything.
    pub fn get_sample(
        &self,
        x: ArrayViewD<'_, f32>,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        options: &SampleOptions,
    ) -> InstrumentResult<Sample> {
        match self {
            Self::ImageClassification(e) => e.get_sample(x).map(Sample::Image),
            Self::ObjectDetection(e) => e
                .get_sample(x, y_i, y_i_pred, options.with_boxes)
                .map(Sample::Image),
            Self::VideoClassification(e) => e.get_sample(x).map(Sample::Frames),
            Self::VideoTracking(e) => e
                .get_sample(x, y_i, y_i_pred, options.with_boxes)
                .map(Sample::Frames),
            Self::So2Sat(e) => {
                let modality = options
                    .modality
                    .as_deref()
                    .ok_or_else(|| ValidationError::MissingField {
                        field: "modality".to_string(),
                    })?
                    .parse::<Modality>()?;
                e.get_sample(x, modality)
            }
        }
    }

    /// Render and write one input; returns the files written.
    pub fn export(
        &mut self,
        x: ArrayViewD<'_, f32>,
        basename: &str,
        y_i: Option<&Annotations>,
        y_i_pred: Option<&Annotations>,
        with_boxes: bool,
    ) -> InstrumentResult<Vec<PathBuf>> {
        match self {
            Self::ImageClassification(e) => e.export(x, basename),
            Self::ObjectDetection(e) => e.export(x, basename, y_i, y_i_pred, with_boxes),
            Self::VideoClassification(e) => e.export(x, basename),
            Self::VideoTracking(e) => e.export(x, basename, y_i, y_i_pred, with_boxes),
            Self::So2Sat(e) => e.export(x, basename),
        }
    }

    /// Directory samples are written into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        match self {
            Self::ImageClassification(e) => e.output_dir(),
            Self::ObjectDetection(e) => e.output_dir(),
            Self::VideoClassification(e) => e.output_dir(),
            Self::VideoTracking(e) => e.output_dir(),
            Self::So2Sat(e) => e.output_dir(),
        }
    }

    /// Whether the variant can overlay boxes.
    #[must_use]
    pub const fn supports_boxes(&self) -> bool {
        matches!(self, Self::ObjectDetection(_) | Self::VideoTracking(_))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ImageClassification(_) => "image_classification",
            Self::ObjectDetection(_) => "object_detection",
            Self::VideoClassification(_) => "video_classification",
            Self::VideoTracking(_) => "video_tracking",
            Self::So2Sat(_) => "so2sat",
        }
    }
}

impl From<ImageClassificationExporter> for Exporter {
    fn from(e: ImageClassificationExporter) -> Self {
        Self::ImageClassification(e)
    }
}

impl From<ObjectDetectionExporter> for Exporter {
    fn from(e: ObjectDetectionExporter) -> Self {
        Self::ObjectDetection(e)
    }
}

impl From<VideoClassificationExporter> for Exporter {
    fn from(e: VideoClassificationExporter) -> Self {
        Self::VideoClassification(e)
    }
}

impl From<VideoTrackingExporter> for Exporter {
    fn from(e: VideoTrackingExporter) -> Self {
        Self::VideoTracking(e)
    }
}

impl From<So2SatExporter> for Exporter {
    fn from(e: So2SatExporter) -> Self {
        Self::So2Sat(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_config_rejects_escaping_subdir() {
        assert!(ExporterConfig::new("/tmp").subdir("../x").validate().is_err());
        assert!(ExporterConfig::new("/tmp").subdir("/abs").validate().is_err());
        assert!(ExporterConfig::new("/tmp").subdir("a/b").validate().is_ok());
    }

    #[test]
    fn test_output_dir_layout() {
        let cfg = ExporterConfig::new("/data/run");
        assert_eq!(cfg.output_dir(), PathBuf::from("/data/run/saved_samples"));
        assert_eq!(cfg.subdir("").output_dir(), PathBuf::from("/data/run"));
    }

    #[test]
    fn test_get_sample_does_not_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::from(ImageClassificationExporter::new(dir.path()));
        let x = ArrayD::<f32>::zeros(IxDyn(&[4, 4, 3]));
        let sample = exporter.get_sample(x.view(), None, None, &SampleOptions::new()).unwrap();
        assert!(sample.is_image());
        assert!(!exporter.output_dir().exists());
    }

    #[test]
    fn test_so2sat_requires_modality() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::from(So2SatExporter::new(dir.path()));
        let x = ArrayD::<f32>::zeros(IxDyn(&[4, 4, SO2SAT_CHANNELS]));
        let err = exporter.get_sample(x.view(), None, None, &SampleOptions::new()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_supports_boxes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Exporter::from(ObjectDetectionExporter::new(dir.path())).supports_boxes());
        assert!(Exporter::from(VideoTrackingExporter::new(dir.path(), 10)).supports_boxes());
        assert!(!Exporter::from(VideoClassificationExporter::new(dir.path(), 10)).supports_boxes());
    }
}
