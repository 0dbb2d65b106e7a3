//! Main preprocessing pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for turning a
//! review store into encoded train/validation datasets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{ConfigValidationError, PipelineConfig};
use crate::dataset::{
    BatchIterator, Dataset, Rated, RecordStore, TokenizedCorpus, class_distribution,
    downsample_majority, split,
};
use crate::embedding::EmbeddingTable;
use crate::encoder::SequenceEncoder;
use crate::error::{Result, ResultExt};
use crate::memory::{MemoryGuard, MemoryProbe, SystemMemory};
use crate::pipeline::progress::{
    ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::text::{Normalizer, ScriptTokenizer, TextProcessor, Tokenizer, tokenize_records};
use crate::types::{PipelineSummary, Record, TokenizedRecord};

/// Everything a trainer needs from one pipeline run.
#[derive(Debug)]
pub struct PreparedData {
    pub train: Dataset,
    pub validation: Dataset,
    /// The table the samples were encoded against; its
    /// [`lookup_matrix`](EmbeddingTable::lookup_matrix) initializes the
    /// embedding layer.
    pub embeddings: EmbeddingTable,
    pub summary: PipelineSummary,
}

/// The main preprocessing pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use review_prep::{Pipeline, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .embedding_path("embeddings.txt")
///     .refine_data(true)
///     .build()?;
///
/// let pipeline = Pipeline::builder().config(config).build()?;
/// let prepared = pipeline.run("reviews.csv")?;
///
/// let mut batches = pipeline.batches(&prepared.train)?;
/// for _ in 0..10 {
///     for batch in batches.iterate() {
///         // feed batch.x / batch.y to the trainer
///     }
/// }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    processor: TextProcessor,
    memory_guard: MemoryGuard,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    save_tokenized: Option<PathBuf>,
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load embeddings and records from disk and prepare both splits.
    pub fn run(&self, records_path: impl AsRef<Path>) -> Result<PreparedData> {
        let records_path = records_path.as_ref();
        self.finish_run(|start| {
            let embeddings = self.load_embeddings()?;

            self.report_progress(ProgressUpdate::new(
                PipelineStage::LoadingRecords,
                0.0,
                "Loading records...",
            ));
            let report = RecordStore::read(records_path, &self.config).context("loading records")?;
            self.report_progress(ProgressUpdate::stage_done(
                PipelineStage::LoadingRecords,
                format!("Loaded {} records", report.records.len()),
            ));

            let mut summary = PipelineSummary::new();
            summary.records_loaded = report.records.len();
            summary.records_skipped = report.skipped;
            if report.skipped > 0 {
                summary.add_warning(format!("{} malformed rows skipped", report.skipped));
            }
            self.prepare_records(report.records, embeddings, summary, start)
        })
    }

    /// Like [`run`](Self::run), but start from a tokenized corpus cache.
    pub fn run_tokenized(&self, corpus_path: impl AsRef<Path>) -> Result<PreparedData> {
        let corpus_path = corpus_path.as_ref();
        self.finish_run(|start| {
            let embeddings = self.load_embeddings()?;

            self.report_progress(ProgressUpdate::new(
                PipelineStage::LoadingRecords,
                0.0,
                "Loading tokenized records...",
            ));
            let tokenized = TokenizedCorpus::read(corpus_path).context("loading records")?;
            self.report_progress(ProgressUpdate::stage_done(
                PipelineStage::LoadingRecords,
                format!("Loaded {} tokenized records", tokenized.len()),
            ));

            let mut summary = PipelineSummary::new();
            summary.records_loaded = tokenized.len();
            let tokenized = self.refine(tokenized, &mut summary);
            self.encode_and_split(tokenized, embeddings, summary, start)
        })
    }

    /// Prepare in-memory records against an already loaded table.
    pub fn prepare(&self, records: Vec<Record>, embeddings: EmbeddingTable) -> Result<PreparedData> {
        self.finish_run(|start| {
            embeddings.check_config(&self.config).context("loading embeddings")?;
            let mut summary = PipelineSummary::new();
            summary.records_loaded = records.len();
            self.prepare_records(records, embeddings, summary, start)
        })
    }

    /// Tokenize records with this pipeline's normalizer, tokenizer and
    /// worker pool.
    pub fn tokenize(&self, records: &[Record]) -> Result<Vec<TokenizedRecord>> {
        tokenize_records(
            records,
            &self.processor,
            self.config.n_workers,
            &self.memory_guard,
            self.progress_reporter.as_deref(),
        )
    }

    /// Batch iterator over `dataset` using the configured batch size and
    /// shuffle seed.
    pub fn batches<'a>(&self, dataset: &'a Dataset) -> Result<BatchIterator<'a>> {
        BatchIterator::new(dataset, self.config.batch_size, self.config.shuffle_seed)
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn finish_run<F>(&self, body: F) -> Result<PreparedData>
    where
        F: FnOnce(Instant) -> Result<PreparedData>,
    {
        let start = Instant::now();
        info!("Starting preprocessing pipeline...");
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            "Starting preprocessing pipeline...",
        ));

        match body(start) {
            Ok(prepared) => {
                self.report_progress(ProgressUpdate::complete("Pipeline completed successfully"));
                Ok(prepared)
            }
            Err(e) => {
                self.report_progress(ProgressUpdate::failed(e.to_string()));
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    fn load_embeddings(&self) -> Result<EmbeddingTable> {
        self.report_progress(ProgressUpdate::new(
            PipelineStage::LoadingEmbeddings,
            0.0,
            "Loading embeddings...",
        ));
        let table = EmbeddingTable::load(&self.config.embedding_path).context("loading embeddings")?;
        table.check_config(&self.config).context("loading embeddings")?;
        self.report_progress(ProgressUpdate::stage_done(
            PipelineStage::LoadingEmbeddings,
            format!("Loaded {} embeddings", table.size()),
        ));
        info!(
            "Embedding table ready: {} tokens x {} dims",
            table.size(),
            table.dimension()
        );
        Ok(table)
    }

    fn prepare_records(
        &self,
        records: Vec<Record>,
        embeddings: EmbeddingTable,
        mut summary: PipelineSummary,
        start: Instant,
    ) -> Result<PreparedData> {
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Tokenizing,
            0.0,
            format!("Tokenizing {} records...", records.len()),
        ));
        let tokenized = self.tokenize(&records).context("tokenizing")?;
        drop(records);
        self.report_progress(ProgressUpdate::stage_done(
            PipelineStage::Tokenizing,
            format!("Tokenized {} records", tokenized.len()),
        ));

        // the cache holds the unrefined corpus; cached runs refine on load
        if let Some(path) = &self.save_tokenized {
            TokenizedCorpus::write(path, &tokenized).context("saving tokenized corpus")?;
        }

        let tokenized = self.refine(tokenized, &mut summary);
        self.encode_and_split(tokenized, embeddings, summary, start)
    }

    fn refine<T: Rated>(&self, rows: Vec<T>, summary: &mut PipelineSummary) -> Vec<T> {
        if !self.config.refine_data {
            return rows;
        }
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Refining,
            0.0,
            "Downsampling majority rating...",
        ));
        let (rows, outcome) =
            downsample_majority(rows, self.config.refine_retention, self.config.seed);
        summary.records_refined_away = outcome.removed();
        self.report_progress(ProgressUpdate::stage_done(
            PipelineStage::Refining,
            format!("Removed {} majority-rating rows", outcome.removed()),
        ));
        rows
    }

    fn encode_and_split(
        &self,
        tokenized: Vec<TokenizedRecord>,
        embeddings: EmbeddingTable,
        mut summary: PipelineSummary,
        start: Instant,
    ) -> Result<PreparedData> {
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Encoding,
            0.0,
            format!("Encoding {} samples...", tokenized.len()),
        ));
        self.memory_guard.check().context("encoding")?;

        summary.class_distribution = class_distribution(&tokenized);
        let (dataset, stats) = Dataset::from_tokenized(
            &tokenized,
            &embeddings,
            self.config.embedding_mode,
            SequenceEncoder::new(self.config.sequence_length),
            self.config.label_encoding(),
        )
        .context("encoding")?;
        drop(tokenized);

        summary.tokens_total = stats.tokens;
        summary.tokens_oov = stats.oov;
        summary.samples_truncated = stats.truncated;
        if stats.empty > 0 {
            summary.add_warning(format!("{} samples have no tokens", stats.empty));
        }
        self.report_progress(ProgressUpdate::stage_done(
            PipelineStage::Encoding,
            format!("Encoded {} samples", dataset.len()),
        ));

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Splitting,
            0.0,
            "Splitting train/validation...",
        ));
        let (train, validation) = split(&dataset, self.config.seed, self.config.validation_fraction)
            .context("splitting")?;
        self.report_progress(ProgressUpdate::stage_done(
            PipelineStage::Splitting,
            format!("{} train / {} validation", train.len(), validation.len()),
        ));

        summary.train_rows = train.len();
        summary.validation_rows = validation.len();
        summary.batches_per_epoch = train.len() / self.config.batch_size;
        summary.vocab_size = embeddings.size();
        summary.embedding_dim = embeddings.dimension();
        if summary.batches_per_epoch == 0 {
            let message = format!(
                "training split ({} rows) is smaller than one batch of {}",
                train.len(),
                self.config.batch_size
            );
            warn!("{}", message);
            summary.add_warning(message);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary.finished_at = chrono::Utc::now().to_rfc3339();

        info!(
            "Prepared {} train / {} validation samples ({:.1}% OOV tokens)",
            summary.train_rows,
            summary.validation_rows,
            summary.oov_percentage()
        );

        Ok(PreparedData {
            train,
            validation,
            embeddings,
            summary,
        })
    }
}

/// Builder for creating a [`Pipeline`] with custom configuration.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    save_tokenized: Option<PathBuf>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the default script-class tokenizer, e.g. with a
    /// morphological analyzer.
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Replace the `/proc/meminfo` probe used by the memory floor.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use review_prep::{ProgressReporter, ProgressUpdate};
    /// use std::sync::Arc;
    ///
    /// struct MyReporter;
    ///
    /// impl ProgressReporter for MyReporter {
    ///     fn report(&self, update: ProgressUpdate) {
    ///         println!("{}: {}", update.stage.display_name(), update.message);
    ///     }
    /// }
    ///
    /// let pipeline = Pipeline::builder()
    ///     .progress_reporter(Arc::new(MyReporter))
    ///     .build()?;
    /// ```
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Write the tokenized corpus to `path` after tokenization, so later
    /// runs can start from [`Pipeline::run_tokenized`].
    pub fn save_tokenized(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_tokenized = Some(path.into());
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let processor = TextProcessor::new(
            Normalizer::new(config.max_char_repeats),
            self.tokenizer.unwrap_or_else(|| Arc::new(ScriptTokenizer)),
        );
        let memory_guard = MemoryGuard::new(
            config.memory_floor_mb,
            self.memory_probe.unwrap_or_else(|| Arc::new(SystemMemory)),
        );

        Ok(Pipeline {
            config,
            processor,
            memory_guard,
            progress_reporter: self.progress_reporter,
            save_tokenized: self.save_tokenized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::TokenSequence;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Splits on whitespace and tags every word `W`.
    struct Whitespace;

    impl Tokenizer for Whitespace {
        fn tokenize(&self, text: &str) -> TokenSequence {
            text.split_whitespace()
                .map(|w| crate::types::Token::new(w, "W"))
                .collect()
        }
    }

    fn table() -> EmbeddingTable {
        EmbeddingTable::new(
            vec!["good/W".into(), "bad/W".into(), "movie/W".into()],
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            2,
        )
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .embedding_dim(2)
            .sequence_length(4)
            .batch_size(2)
            .memory_floor_mb(0)
            .n_workers(2)
            .build()
            .unwrap()
    }

    fn records() -> Vec<Record> {
        (0..10)
            .map(|i| {
                let comment = if i % 2 == 0 { "good movie" } else { "bad bad movie plot" };
                Record::new(i, (i % 10 + 1) as u8, comment)
            })
            .collect()
    }

    fn pipeline() -> Pipeline {
        Pipeline::builder()
            .config(config())
            .tokenizer(Arc::new(Whitespace))
            .build()
            .unwrap()
    }

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.config.sequence_length, 200);
        assert!(pipeline.save_tokenized.is_none());
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let config = PipelineConfig {
            validation_fraction: 1.0,
            ..PipelineConfig::default()
        };
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn test_prepare_in_memory() {
        let prepared = pipeline().prepare(records(), table()).unwrap();

        assert_eq!(prepared.train.len(), 8);
        assert_eq!(prepared.validation.len(), 2);
        assert_eq!(prepared.train.feature_width(), 4);
        assert_eq!(prepared.train.label_width(), 10);

        let summary = &prepared.summary;
        assert_eq!(summary.records_loaded, 10);
        assert_eq!(summary.tokens_total, 5 * 2 + 5 * 4);
        // "plot" x5 is the only unknown token
        assert_eq!(summary.tokens_oov, 5);
        assert_eq!(summary.batches_per_epoch, 4);
        assert_eq!(summary.vocab_size, 3);
        assert!(!summary.finished_at.is_empty());
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let a = pipeline().prepare(records(), table()).unwrap();
        let b = pipeline().prepare(records(), table()).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.validation, b.validation);
    }

    #[test]
    fn test_label_range_mismatch_is_configuration_error() {
        let config = PipelineConfig::builder()
            .embedding_dim(2)
            .n_classes(5)
            .memory_floor_mb(0)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().config(config).build().unwrap();

        let err = pipeline.prepare(records(), table()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().starts_with("encoding"));
    }

    #[test]
    fn test_dimension_mismatch_is_configuration_error() {
        let pipeline = Pipeline::builder().build().unwrap();
        let err = pipeline.prepare(records(), table()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    struct NoMemory;

    impl MemoryProbe for NoMemory {
        fn available_mb(&self) -> Option<u64> {
            Some(1)
        }
    }

    #[test]
    fn test_memory_floor_is_fatal() {
        let config = PipelineConfig::builder()
            .embedding_dim(2)
            .memory_floor_mb(512)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder()
            .config(config)
            .memory_probe(Arc::new(NoMemory))
            .build()
            .unwrap();

        let err = pipeline.prepare(records(), table()).unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(matches!(err, PipelineError::WithContext { .. }));
    }

    #[test]
    fn test_pipeline_reports_progress() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stages);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let pipeline = Pipeline::builder()
            .config(config())
            .on_progress(move |update| {
                counter.fetch_add(1, Ordering::SeqCst);
                sink.lock().unwrap().push(update.stage);
            })
            .build()
            .unwrap();
        pipeline.prepare(records(), table()).unwrap();

        let stages = stages.lock().unwrap();
        assert_eq!(stages.first(), Some(&PipelineStage::Initializing));
        assert_eq!(stages.last(), Some(&PipelineStage::Complete));
        assert!(stages.contains(&PipelineStage::Tokenizing));
        assert!(stages.contains(&PipelineStage::Splitting));
        assert!(calls.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn test_failure_reports_failed_stage() {
        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        let pipeline = Pipeline::builder()
            .on_progress(move |update| {
                *sink.lock().unwrap() = Some(update.stage);
            })
            .build()
            .unwrap();

        assert!(pipeline.prepare(records(), table()).is_err());
        assert_eq!(*last.lock().unwrap(), Some(PipelineStage::Failed));
    }

    #[test]
    fn test_refinement_in_pipeline() {
        let config = PipelineConfig::builder()
            .embedding_dim(2)
            .memory_floor_mb(0)
            .refine_data(true)
            .refine_retention(0.2)
            .seed(1)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().config(config).build().unwrap();

        let ratings = [10, 10, 10, 10, 10, 1, 2, 3, 4, 5];
        let records: Vec<Record> = ratings
            .iter()
            .enumerate()
            .map(|(i, &r)| Record::new(i, r, "좋은 영화"))
            .collect();

        let prepared = pipeline.prepare(records, table()).unwrap();
        let summary = prepared.summary;
        assert_eq!(summary.records_refined_away, 4);
        assert_eq!(summary.class_distribution.get(&10), Some(&1));
        assert_eq!(summary.class_distribution.values().sum::<usize>(), 6);
    }

    #[test]
    fn test_batches_use_configured_size() {
        let pipeline = pipeline();
        let prepared = pipeline.prepare(records(), table()).unwrap();
        let mut batches = pipeline.batches(&prepared.train).unwrap();
        assert_eq!(batches.iterate().count(), 4);
    }
}
