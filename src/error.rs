//! Custom error types for the exporter.
//!
//! This module defines the primary error type, `ExportError`, used across the crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that occur while turning a catalogued scan into archive files.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: configuration parsing (figment) and semantic
//!   validation failures. Fatal at startup.
//! - **`Io`**, **`Json`**: file system and catalog document decoding failures.
//! - **`ScanNotFound`**, **`StreamNotFound`**, **`FieldNotFound`**, **`MissingField`**,
//!   **`FieldType`**: the scan's metadata or data streams do not have the shape an
//!   exporter requires. Fatal to the single export call.
//! - **`ShapeMismatch`**: array dimensions disagree (e.g. dark and flat frames).
//! - **`Align`**: the timestamp-angle aligner rejected its input.
//! - **`UnsupportedScanType`**: no exporter is registered for the plan name.
//! - **`Storage`** / **`Hdf5`**: archive writing failed.
//! - **`Enrichment`**: optional metadata could not be attached. Exporters capture this
//!   as a warning instead of propagating it.
//!
//! There is no retry policy: every error aborts the export it occurred in, and
//! archives that were not committed are removed.

use crate::align::AlignError;
use thiserror::Error;

/// Convenience alias for results using the exporter error type.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Primary error type for scan export.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Configuration loading failed (TOML syntax, environment overrides, type mismatch).
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A catalog document could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No run in the catalog matches the requested reference.
    #[error("Scan not found: {0}")]
    ScanNotFound(String),

    /// A required start document field is absent.
    #[error("Missing field '{key}' in start document")]
    MissingField {
        /// Dotted key path, e.g. `plan_args.num`.
        key: String,
    },

    /// A start document field exists but has the wrong type.
    #[error("Field '{key}' is not a valid {expected}")]
    FieldType {
        /// Dotted key path.
        key: String,
        /// Human readable expected type.
        expected: &'static str,
    },

    /// The scan has no stream with this name.
    #[error("Stream '{stream}' not found in scan")]
    StreamNotFound {
        /// Stream name, e.g. `primary`, `baseline`.
        stream: String,
    },

    /// The stream exists but does not carry the requested field or column.
    #[error("Field '{field}' not found in stream '{stream}'")]
    FieldNotFound {
        /// Stream name.
        stream: String,
        /// Field or column name.
        field: String,
    },

    /// Array dimensions are inconsistent.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Timestamp-angle alignment failed.
    #[error("Alignment error: {0}")]
    Align(#[from] AlignError),

    /// The plan name is not one of the supported scan types.
    #[error("Unsupported scan type '{plan_name}'{}", legacy_suffix(.legacy))]
    UnsupportedScanType {
        /// Plan name from the start document.
        plan_name: String,
        /// Whether the scan was classified as a legacy scan.
        legacy: bool,
    },

    /// Functionality requires a Cargo feature that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Writing an archive, raster or text output failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// HDF5 library error.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Optional metadata enrichment could not be performed.
    #[error("Enrichment unavailable: {0}")]
    Enrichment(String),
}

fn legacy_suffix(legacy: &bool) -> &'static str {
    if *legacy {
        " (legacy scan)"
    } else {
        ""
    }
}

impl From<figment::Error> for ExportError {
    fn from(value: figment::Error) -> Self {
        ExportError::Config(Box::new(value))
    }
}

impl From<tempfile::PathPersistError> for ExportError {
    fn from(value: tempfile::PathPersistError) -> Self {
        ExportError::Io(value.error)
    }
}

impl From<tiff::TiffError> for ExportError {
    fn from(value: tiff::TiffError) -> Self {
        ExportError::Storage(format!("TIFF encoding failed: {value}"))
    }
}

impl From<image::ImageError> for ExportError {
    fn from(value: image::ImageError) -> Self {
        ExportError::Storage(format!("image encoding failed: {value}"))
    }
}

impl ExportError {
    /// Shorthand for a missing start document field.
    pub fn missing(key: impl Into<String>) -> Self {
        ExportError::MissingField { key: key.into() }
    }

    /// Whether this error belongs to the tolerated "optional enrichment" category.
    pub fn is_enrichment(&self) -> bool {
        matches!(self, ExportError::Enrichment(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_scan_type_mentions_legacy() {
        let err = ExportError::UnsupportedScanType {
            plan_name: "tomo_scan".into(),
            legacy: true,
        };
        assert_eq!(err.to_string(), "Unsupported scan type 'tomo_scan' (legacy scan)");

        let err = ExportError::UnsupportedScanType {
            plan_name: "spiral_scan".into(),
            legacy: false,
        };
        assert_eq!(err.to_string(), "Unsupported scan type 'spiral_scan'");
    }

    #[test]
    fn alignment_errors_convert() {
        let err: ExportError = AlignError::EmptyMotorSeries.into();
        assert!(matches!(err, ExportError::Align(AlignError::EmptyMotorSeries)));
    }

    #[test]
    fn enrichment_classification() {
        assert!(ExportError::Enrichment("no lakeshore".into()).is_enrichment());
        assert!(!ExportError::missing("uid").is_enrichment());
    }
}
