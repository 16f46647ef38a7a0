//! Values that probes publish.
//!
//! A probe update carries a set of named values: raw tensors (image batches,
//! video clips, sensor tiles, class scores), batches of structured
//! label/prediction annotations, or plain scalars.

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Normalized `[x_min, y_min, x_max, y_max]` box, each coordinate in `[0, 1]`.
pub type BoundingBox = [f32; 4];

/// Structured label or prediction record for one sample.
///
/// Every field is optional. Detection records carry one row per object;
/// tracking records carry one row per frame.
///
/// # Examples
///
/// ```
/// use probehub::Annotations;
///
/// let y = Annotations::new()
///     .with_boxes(vec![[0.0, 0.0, 1.0, 1.0]])
///     .with_labels(vec![1])
///     .with_image_id(7);
///
/// assert_eq!(y.len(), 1);
/// assert_eq!(y.image_id, Some(7));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
}

impl Annotations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_boxes(mut self, boxes: Vec<BoundingBox>) -> Self {
        self.boxes = Some(boxes);
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<i64>) -> Self {
        self.labels = Some(labels);
        self
    }

    #[must_use]
    pub fn with_scores(mut self, scores: Vec<f32>) -> Self {
        self.scores = Some(scores);
        self
    }

    #[must_use]
    pub const fn with_image_id(mut self, image_id: i64) -> Self {
        self.image_id = Some(image_id);
        self
    }

    /// Boxes, or an empty slice when absent.
    #[must_use]
    pub fn boxes(&self) -> &[BoundingBox] {
        self.boxes.as_deref().unwrap_or(&[])
    }

    /// Number of box rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes().is_empty()
    }
}

/// A named value published through a probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Dense array; the leading axis is the batch axis when batched.
    Tensor(ArrayD<f32>),
    /// One annotation record per sample of a batch.
    Annotations(Vec<Annotations>),
    Int(i64),
    Float(f64),
    String(String),
    Null,
}

impl Value {
    pub const fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }

    pub const fn is_annotations(&self) -> bool {
        matches!(self, Self::Annotations(_))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::Tensor(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_annotations(&self) -> Option<&[Annotations]> {
        match self {
            Self::Annotations(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Number of samples in a batched value.
    ///
    /// Tensors report their leading dimension (a 0-d tensor counts as one
    /// sample); annotation batches report their record count. Scalars have no
    /// batch axis.
    #[must_use]
    pub fn batch_len(&self) -> Option<usize> {
        match self {
            Self::Tensor(t) => Some(t.shape().first().copied().unwrap_or(1)),
            Self::Annotations(a) => Some(a.len()),
            _ => None,
        }
    }

    /// Slice out sample `index` of a batched value.
    #[must_use]
    pub fn sample(&self, index: usize) -> Option<Self> {
        match self {
            Self::Tensor(t) if t.ndim() > 0 && index < t.shape()[0] => {
                Some(Self::Tensor(t.index_axis(Axis(0), index).to_owned()))
            }
            Self::Annotations(a) => a.get(index).map(|ann| Self::Annotations(vec![ann.clone()])),
            _ => None,
        }
    }

    /// Single annotation record, when this value holds exactly one.
    #[must_use]
    pub fn single_annotation(&self) -> Option<&Annotations> {
        match self {
            Self::Annotations(a) if a.len() == 1 => a.first(),
            _ => None,
        }
    }

    /// JSON view used by result records and prediction dumps.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Tensor(t) => tensor_to_json(t),
            Self::Annotations(a) => serde_json::to_value(a).unwrap_or(serde_json::Value::Null),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::String(v) => serde_json::Value::from(v.as_str()),
            Self::Null => serde_json::Value::Null,
        }
    }
}

fn tensor_to_json(t: &ArrayD<f32>) -> serde_json::Value {
    if t.ndim() == 0 {
        return t.iter().next().map_or(serde_json::Value::Null, |v| serde_json::Value::from(f64::from(*v)));
    }
    let rows: Vec<serde_json::Value> = t
        .axis_iter(Axis(0))
        .map(|row| tensor_to_json(&row.to_owned()))
        .collect();
    serde_json::Value::Array(rows)
}

impl From<ArrayD<f32>> for Value {
    fn from(v: ArrayD<f32>) -> Self {
        Self::Tensor(v)
    }
}

impl From<Vec<Annotations>> for Value {
    fn from(v: Vec<Annotations>) -> Self {
        Self::Annotations(v)
    }
}

impl From<Annotations> for Value {
    fn from(v: Annotations) -> Self {
        Self::Annotations(vec![v])
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
