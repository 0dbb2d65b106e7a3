//! Configuration types for the review preprocessing pipeline.
//!
//! All knobs live in one immutable [`PipelineConfig`] passed into each
//! component's constructor. Build it with [`PipelineConfig::builder()`] or
//! deserialize it from JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Which kind of pre-trained embedding the features are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    /// Token-level table: each sample becomes a fixed-length index sequence.
    #[default]
    Word,
    /// Document-level table keyed by record id: each sample becomes one dense vector.
    Document,
}

/// How ratings are turned into training targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    /// The rating itself as a single float target (regression).
    Scalar,
    /// A vector of width `n_classes` with a 1 at position `rating - 1`.
    OneHot { n_classes: usize },
}

impl LabelEncoding {
    /// Resolve the encoding from a class count: one class means regression.
    pub fn from_n_classes(n_classes: usize) -> Self {
        if n_classes > 1 {
            LabelEncoding::OneHot { n_classes }
        } else {
            LabelEncoding::Scalar
        }
    }

    /// Width of one encoded label row.
    pub fn width(&self) -> usize {
        match self {
            LabelEncoding::Scalar => 1,
            LabelEncoding::OneHot { n_classes } => *n_classes,
        }
    }
}

/// Configuration for the preprocessing pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use review_prep::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .sequence_length(150)
///     .batch_size(64)
///     .refine_data(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed token width of every encoded sample.
    /// Default: 200
    pub sequence_length: usize,

    /// Rows per training batch.
    /// Default: 128
    pub batch_size: usize,

    /// Number of rating classes. 1 selects scalar regression targets.
    /// Default: 10
    pub n_classes: usize,

    /// Expected vocabulary size. When set, the loaded embedding table must match.
    /// Default: None
    pub vocab_size: Option<usize>,

    /// Fraction of rows held out for validation, exclusive range (0, 1).
    /// Default: 0.2
    pub validation_fraction: f64,

    /// Seed for the train/validation split and for refinement sampling.
    /// Default: 1337
    pub seed: u64,

    /// Seed for per-epoch batch shuffling. None re-randomizes every epoch.
    /// Default: None
    pub shuffle_seed: Option<u64>,

    /// Whether to downsample the majority rating bucket.
    /// Default: false
    pub refine_data: bool,

    /// Fraction of majority-bucket rows kept when refining (0.0 - 1.0).
    /// Default: 0.2
    pub refine_retention: f64,

    /// Path to the word2vec text embedding artifact.
    /// Default: "ko_embeds.model"
    pub embedding_path: PathBuf,

    /// Dimension of the embedding vectors.
    /// Default: 300
    pub embedding_dim: usize,

    /// Word or document level embeddings.
    /// Default: Word
    pub embedding_mode: EmbeddingMode,

    /// Worker threads used for tokenization.
    /// Default: 5
    pub n_workers: usize,

    /// Abort when available memory drops below this many MiB. 0 disables the check.
    /// Default: 256
    pub memory_floor_mb: u64,

    /// Malformed records skipped before the load is aborted.
    /// Default: 1000
    pub max_malformed_rows: usize,

    /// Cap on records read from the store. 0 reads everything.
    /// Default: 0
    pub max_records: usize,

    /// Repeated word characters are collapsed to this many copies.
    /// Default: 2
    pub max_char_repeats: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequence_length: 200,
            batch_size: 128,
            n_classes: 10,
            vocab_size: None,
            validation_fraction: 0.2,
            seed: 1337,
            shuffle_seed: None,
            refine_data: false,
            refine_retention: 0.2,
            embedding_path: PathBuf::from("ko_embeds.model"),
            embedding_dim: 300,
            embedding_mode: EmbeddingMode::default(),
            n_workers: 5,
            memory_floor_mb: 256,
            max_malformed_rows: 1000,
            max_records: 0,
            max_char_repeats: 2,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Io(e).with_context(format!("reading config {}", path.display()))
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Label encoding implied by `n_classes`.
    pub fn label_encoding(&self) -> LabelEncoding {
        LabelEncoding::from_n_classes(self.n_classes)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        for (field, value) in [
            ("sequence_length", self.sequence_length),
            ("batch_size", self.batch_size),
            ("n_classes", self.n_classes),
            ("embedding_dim", self.embedding_dim),
            ("n_workers", self.n_workers),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::MustBePositive(field.to_string()));
            }
        }

        if self.vocab_size == Some(0) {
            return Err(ConfigValidationError::MustBePositive(
                "vocab_size".to_string(),
            ));
        }

        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(ConfigValidationError::InvalidFraction {
                field: "validation_fraction".to_string(),
                value: self.validation_fraction,
            });
        }

        if !(0.0..=1.0).contains(&self.refine_retention) {
            return Err(ConfigValidationError::InvalidFraction {
                field: "refine_retention".to_string(),
                value: self.refine_retention,
            });
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid fraction for '{field}': {value}")]
    InvalidFraction { field: String, value: f64 },

    #[error("'{0}' must be greater than zero")]
    MustBePositive(String),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    sequence_length: Option<usize>,
    batch_size: Option<usize>,
    n_classes: Option<usize>,
    vocab_size: Option<usize>,
    validation_fraction: Option<f64>,
    seed: Option<u64>,
    shuffle_seed: Option<u64>,
    refine_data: Option<bool>,
    refine_retention: Option<f64>,
    embedding_path: Option<PathBuf>,
    embedding_dim: Option<usize>,
    embedding_mode: Option<EmbeddingMode>,
    n_workers: Option<usize>,
    memory_floor_mb: Option<u64>,
    max_malformed_rows: Option<usize>,
    max_records: Option<usize>,
    max_char_repeats: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Set the fixed token width of encoded samples.
    pub fn sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = Some(length);
        self
    }

    /// Set the number of rows per batch.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the number of rating classes (1 = scalar regression target).
    pub fn n_classes(mut self, n: usize) -> Self {
        self.n_classes = Some(n);
        self
    }

    /// Require the embedding table to contain exactly this many tokens.
    pub fn vocab_size(mut self, size: usize) -> Self {
        self.vocab_size = Some(size);
        self
    }

    /// Set the validation fraction.
    ///
    /// # Arguments
    /// * `fraction` - Value strictly between 0.0 and 1.0 (e.g., 0.2 = 20%)
    pub fn validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = Some(fraction);
        self
    }

    /// Set the seed used for splitting and refinement.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Make per-epoch shuffling reproducible.
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Enable or disable majority-bucket downsampling.
    pub fn refine_data(mut self, refine: bool) -> Self {
        self.refine_data = Some(refine);
        self
    }

    /// Set the fraction of majority-bucket rows kept when refining.
    pub fn refine_retention(mut self, retention: f64) -> Self {
        self.refine_retention = Some(retention);
        self
    }

    /// Set the embedding artifact path.
    pub fn embedding_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.embedding_path = Some(path.into());
        self
    }

    /// Set the expected embedding dimension.
    pub fn embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = Some(dim);
        self
    }

    /// Choose word or document level embeddings.
    pub fn embedding_mode(mut self, mode: EmbeddingMode) -> Self {
        self.embedding_mode = Some(mode);
        self
    }

    /// Set the number of tokenizer worker threads.
    pub fn n_workers(mut self, n: usize) -> Self {
        self.n_workers = Some(n);
        self
    }

    /// Set the available-memory floor in MiB (0 disables the check).
    pub fn memory_floor_mb(mut self, mb: u64) -> Self {
        self.memory_floor_mb = Some(mb);
        self
    }

    /// Set how many malformed records may be skipped.
    pub fn max_malformed_rows(mut self, n: usize) -> Self {
        self.max_malformed_rows = Some(n);
        self
    }

    /// Cap the number of records read (0 = unlimited).
    pub fn max_records(mut self, n: usize) -> Self {
        self.max_records = Some(n);
        self
    }

    /// Set how many copies of a repeated character survive normalization.
    pub fn max_char_repeats(mut self, n: usize) -> Self {
        self.max_char_repeats = Some(n);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> std::result::Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            sequence_length: self.sequence_length.unwrap_or(defaults.sequence_length),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            n_classes: self.n_classes.unwrap_or(defaults.n_classes),
            vocab_size: self.vocab_size,
            validation_fraction: self
                .validation_fraction
                .unwrap_or(defaults.validation_fraction),
            seed: self.seed.unwrap_or(defaults.seed),
            shuffle_seed: self.shuffle_seed,
            refine_data: self.refine_data.unwrap_or(defaults.refine_data),
            refine_retention: self.refine_retention.unwrap_or(defaults.refine_retention),
            embedding_path: self.embedding_path.unwrap_or(defaults.embedding_path),
            embedding_dim: self.embedding_dim.unwrap_or(defaults.embedding_dim),
            embedding_mode: self.embedding_mode.unwrap_or_default(),
            n_workers: self.n_workers.unwrap_or(defaults.n_workers),
            memory_floor_mb: self.memory_floor_mb.unwrap_or(defaults.memory_floor_mb),
            max_malformed_rows: self
                .max_malformed_rows
                .unwrap_or(defaults.max_malformed_rows),
            max_records: self.max_records.unwrap_or(defaults.max_records),
            max_char_repeats: self.max_char_repeats.unwrap_or(defaults.max_char_repeats),
        };

        config.validate()?;
        Ok(config)
    }
}
