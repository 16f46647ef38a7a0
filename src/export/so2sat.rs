//! So2Sat multi-modal tiles.
//!
//! Channel layout of an `H x W x 14` tile: 0/1 are the real and imaginary
//! parts of the VH SAR polarization, 2/3 the same for VV, and 4..14 are the
//! ten optical (EO) bands.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::DynamicImage;
use ndarray::{Array2, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{InstrumentResult, ValidationError};

use super::render::{plane_to_gray, save_png, shape_error};
use super::{ExporterConfig, OutputDir, Sample};

/// Channels in a So2Sat tile.
pub const SO2SAT_CHANNELS: usize = 14;
/// Optical bands rendered by the `eo` modality.
pub const EO_BANDS: usize = 10;

const EO_OFFSET: usize = 4;
const SAR_EPS: f32 = 1e-9;

/// Rendering mode for a So2Sat tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Vh,
    Vv,
    Eo,
}

impl Modality {
    pub const ALL: [Self; 3] = [Self::Vh, Self::Vv, Self::Eo];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vh => "vh",
            Self::Vv => "vv",
            Self::Eo => "eo",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vh" => Ok(Self::Vh),
            "vv" => Ok(Self::Vv),
            "eo" => Ok(Self::Eo),
            other => Err(ValidationError::UnsupportedModality {
                modality: other.to_string(),
            }),
        }
    }
}

/// Renders So2Sat tiles per modality.
#[derive(Debug, Clone)]
pub struct So2SatExporter {
    output: OutputDir,
}

impl So2SatExporter {
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

    /// `vh`/`vv` yield one SAR intensity image, `eo` yields one image per band.
    pub fn get_sample(&self, x: ArrayViewD<'_, f32>, modality: Modality) -> InstrumentResult<Sample> {
        let tile = tile_view(&x)?;
        match modality {
            Modality::Vh => sar_image(tile, 0).map(Sample::Image),
            Modality::Vv => sar_image(tile, 2).map(Sample::Image),
            Modality::Eo => (0..EO_BANDS)
                .map(|band| {
                    let plane = normalize(tile.index_axis(Axis(2), EO_OFFSET + band));
                    plane_to_gray(plane.view())
                })
                .collect::<InstrumentResult<Vec<_>>>()
                .map(Sample::Frames),
        }
    }

    /// Writes `<basename>_vh.png`, `<basename>_vv.png` and
    /// `<basename>_eo<k>.png` for every band.
    pub fn export(&mut self, x: ArrayViewD<'_, f32>, basename: &str) -> InstrumentResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(2 + EO_BANDS);
        for modality in Modality::ALL {
            let sample = self.get_sample(x.clone(), modality)?;
            match sample {
                Sample::Image(img) => {
                    let path = self.output.file(&format!("{basename}_{modality}.png"))?;
                    save_png(&img, &path)?;
                    written.push(path);
                }
                Sample::Frames(bands) => {
                    for (k, img) in bands.iter().enumerate() {
                        let path = self.output.file(&format!("{basename}_{modality}{k}.png"))?;
                        save_png(img, &path)?;
                        written.push(path);
                    }
                }
            }
        }
        Ok(written)
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }
}

fn tile_view<'a>(x: &ArrayViewD<'a, f32>) -> InstrumentResult<ArrayView3<'a, f32>> {
    let expected = "H x W x 14 So2Sat tile";
    if x.ndim() != 3 || x.shape()[2] != SO2SAT_CHANNELS {
        return Err(shape_error(expected, x.shape()));
    }
    x.clone()
        .into_dimensionality::<Ix3>()
        .map_err(|_| shape_error(expected, x.shape()))
}

/// Log-compressed magnitude of a real/imaginary channel pair.
fn sar_image(tile: ArrayView3<'_, f32>, real_channel: usize) -> InstrumentResult<DynamicImage> {
    let re = tile.index_axis(Axis(2), real_channel);
    let im = tile.index_axis(Axis(2), real_channel + 1);
    let mut magnitude = Array2::<f32>::zeros(re.dim());
    Zip::from(&mut magnitude)
        .and(&re)
        .and(&im)
        .for_each(|m, &r, &i| *m = (r.hypot(i) + SAR_EPS).log10());
    plane_to_gray(normalize(magnitude.view()).view())
}

/// Min-max scale into `[0, 1]`; flat planes become all zeros.
fn normalize(plane: ArrayView2<'_, f32>) -> Array2<f32> {
    let (lo, hi) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if !range.is_finite() || range <= f32::EPSILON {
        return Array2::zeros(plane.dim());
    }
    plane.mapv(|v| (v - lo) / range)
}
