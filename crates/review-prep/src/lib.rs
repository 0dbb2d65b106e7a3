//! Review Preprocessing Library
//!
//! Turns a store of rated free-text reviews into fixed-length index samples
//! and labels ready for a rating regression/classification model.
//!
//! # Overview
//!
//! - **Record loading**: polars-backed CSV reading with malformed-row tolerance
//! - **Text normalization**: emoticon and repeated-character cleanup
//! - **Tokenization**: pluggable [`Tokenizer`] run on a sharded worker pool
//! - **Embeddings**: word2vec text tables with a shared padding/unknown sentinel
//! - **Refinement**: optional seeded downsampling of the majority rating
//! - **Splitting and batching**: seeded train/validation split and
//!   epoch-wise shuffled full batches
//! - **Progress Reporting**: stage-weighted progress updates
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use review_prep::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .embedding_path("ko_embeds.txt")
//!     .sequence_length(200)
//!     .batch_size(128)
//!     .build()?;
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?;
//!
//! let prepared = pipeline.run("reviews.csv")?;
//! let embedding_init = prepared.embeddings.lookup_matrix();
//!
//! let mut batches = pipeline.batches(&prepared.train)?;
//! for epoch in 0..10 {
//!     for batch in batches.iterate() {
//!         // batch.x is (B, L) indices, batch.y is (B, n_classes)
//!     }
//! }
//! ```
//!
//! # Sentinel index
//!
//! With a vocabulary of size `V`, encoded samples only hold values in
//! `0..=V`. Index `V` is shared by padding and out-of-vocabulary tokens and
//! maps to the all-zero last row of [`EmbeddingTable::lookup_matrix`].

pub mod config;
pub mod dataset;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod text;
pub mod types;

// Re-exports for convenient access
pub use config::{
    ConfigValidationError, EmbeddingMode, LabelEncoding, PipelineConfig, PipelineConfigBuilder,
};
pub use dataset::{
    Batch, BatchIterator, Dataset, DatasetBuilder, Epoch, EpochState, FeatureRow, Features,
    RecordStore, RefineOutcome, TokenizedCorpus, downsample_majority, split,
};
pub use embedding::{EmbeddingTable, Vocabulary};
pub use encoder::{EncodedSample, EncodingStats, SequenceEncoder, encode};
pub use error::{PipelineError, Result as PipelineResult, ResultExt};
pub use memory::{MemoryGuard, MemoryProbe, SystemMemory};
pub use pipeline::{
    ClosureProgressReporter, Pipeline, PipelineBuilder, PipelineStage, PreparedData,
    ProgressReporter, ProgressUpdate,
};
pub use text::{Normalizer, ScriptTokenizer, TextProcessor, Tokenizer};
pub use types::{
    LoadReport, PipelineSummary, Record, Token, TokenSequence, TokenizedRecord,
};
