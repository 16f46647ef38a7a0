//! Error types for probehub.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Validation errors describe bad inputs at a meter or
//! exporter boundary; export errors describe failures while persisting
//! samples and are never retried internally.

use std::path::PathBuf;

use thiserror::Error;

/// Validation errors that occur while checking dispatched inputs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Expected {expected}, got array of shape {actual:?}")]
    ShapeMismatch {
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Batch size mismatch: '{left}' has {left_len} samples, '{right}' has {right_len}")]
    BatchSizeMismatch {
        left: String,
        left_len: usize,
        right: String,
        right_len: usize,
    },

    #[error("Unsupported modality '{modality}' (expected one of: vh, vv, eo)")]
    UnsupportedModality {
        modality: String,
    },

    #[error("Unsupported overwrite mode '{mode}' (expected increment or overwrite)")]
    UnsupportedOverwriteMode {
        mode: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Value '{name}' has unexpected type: expected {expected}")]
    UnexpectedValueType {
        name: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised while rendering or persisting samples.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error type for probehub.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl InstrumentError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an export error.
    #[must_use]
    pub const fn is_export(&self) -> bool {
        matches!(self, Self::Export(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the underlying failure was a filesystem error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Export(ExportError::Io { .. }))
    }
}

impl ExportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for probehub operations.
pub type InstrumentResult<T> = Result<T, InstrumentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = ValidationError::ShapeMismatch {
            expected: "H x W x C image".to_string(),
            actual: vec![4, 4],
        };
        let msg = format!("{err}");
        assert!(msg.contains("H x W x C"));
        assert!(msg.contains("[4, 4]"));
    }

    #[test]
    fn test_unsupported_modality_message() {
        let err = ValidationError::UnsupportedModality {
            modality: "rgb".to_string(),
        };
        assert!(format!("{err}").contains("'rgb'"));
    }

    #[test]
    fn test_batch_size_mismatch_message() {
        let err = ValidationError::BatchSizeMismatch {
            left: "scenario.y".to_string(),
            left_len: 2,
            right: "scenario.y_pred".to_string(),
            right_len: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("scenario.y_pred"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_instrument_error_from_validation() {
        let err: InstrumentError = ValidationError::MissingField {
            field: "x".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_export());
    }

    #[test]
    fn test_instrument_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: InstrumentError = ExportError::io("/tmp/out.png", io).into();
        assert!(err.is_export());
        assert!(err.is_io());
        assert!(format!("{err}").contains("/tmp/out.png"));
    }

    #[test]
    fn test_instrument_error_internal() {
        let err = InstrumentError::internal("poisoned registry");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("poisoned registry"));
    }
}
