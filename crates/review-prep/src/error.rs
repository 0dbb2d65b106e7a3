//! Error types for the review preprocessing pipeline.
//!
//! Every stage reports failures through [`PipelineError`]. Per-record
//! format problems are recovered by the loader up to a configured
//! tolerance; everything else aborts the run.
//!
//! Errors serialize as `{code, message}` so a caller can surface them
//! without matching on variants.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

use crate::config::ConfigValidationError;

/// The main error type for the preprocessing pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Settings are missing or inconsistent with the data.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigValidationError),

    /// A record or artifact line could not be parsed.
    #[error("Format error at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// More malformed records than the configured tolerance allows.
    #[error("{skipped} malformed records exceed the tolerance of {tolerance}")]
    TooManyMalformedRows { skipped: usize, tolerance: usize },

    /// Available memory dropped below the configured floor.
    #[error("Available memory {available_mb} MiB is below the floor of {floor_mb} MiB")]
    ResourceExhausted { available_mb: u64, floor_mb: u64 },

    /// A component was called with an argument outside its contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Column was not found in the record store.
    #[error("Column '{0}' not found in record store")]
    ColumnNotFound(String),

    /// Internal error (e.g., worker thread panic).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error annotated with the stage or operation that produced it.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a per-line format error.
    pub fn format(line: usize, reason: impl Into<String>) -> Self {
        PipelineError::Format {
            line,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Format { .. } => "FORMAT_ERROR",
            Self::TooManyMalformedRows { .. } => "TOO_MANY_MALFORMED_ROWS",
            Self::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether this error is a single-record problem the loader may skip.
    ///
    /// Only bare [`PipelineError::Format`] errors raised while reading
    /// records are recoverable; once wrapped in context they have already
    /// escalated out of the loader.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Check if this error is (or wraps) a resource exhaustion.
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } => true,
            Self::WithContext { source, .. } => source.is_resource_exhausted(),
            _ => false,
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Io(e).with_context(context))
    }
}
