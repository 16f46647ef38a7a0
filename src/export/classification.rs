use std::path::{Path, PathBuf};

use image::DynamicImage;
use ndarray::ArrayViewD;

use crate::error::InstrumentResult;

use super::render::{as_image_view, save_png, tensor_to_image};
use super::{ExporterConfig, OutputDir};

/// Writes `H x W x C` images as PNG, without overlays.
#[derive(Debug, Clone)]
pub struct ImageClassificationExporter {
    output: OutputDir,
}

impl ImageClassificationExporter {
    #[must_use]
    pub fn new(base_output_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(&ExporterConfig::new(base_output_dir))
    }

    #[must_use]
    pub fn with_config(config: &ExporterConfig) -> Self {
        Self {
            output: OutputDir::new(config),
        }
    }

    pub fn get_sample(&self, x: ArrayViewD<'_, f32>) -> InstrumentResult<DynamicImage> {
        tensor_to_image(as_image_view(&x)?)
    }

    pub fn export(&mut self, x: ArrayViewD<'_, f32>, basename: &str) -> InstrumentResult<Vec<PathBuf>> {
        let img = self.get_sample(x)?;
        let path = self.output.file(&format!("{basename}.png"))?;
        save_png(&img, &path)?;
        Ok(vec![path])
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }
}
