//! Progress reporting for the preprocessing pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use review_prep::Pipeline;
//!
//! let prepared = Pipeline::builder()
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .run("reviews.csv")?;
//! ```

use serde::{Deserialize, Serialize};

/// Stages of the preprocessing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Validating configuration
    Initializing,
    /// Reading the embedding table
    LoadingEmbeddings,
    /// Reading the record store (or tokenized cache)
    LoadingRecords,
    /// Normalizing and tokenizing comments
    Tokenizing,
    /// Downsampling the majority rating
    Refining,
    /// Turning token sequences into fixed-length samples
    Encoding,
    /// Building the train/validation split
    Splitting,
    /// Pipeline completed successfully
    Complete,
    /// Pipeline failed with an error
    Failed,
}

impl PipelineStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::LoadingEmbeddings => "Loading Embeddings",
            Self::LoadingRecords => "Loading Records",
            Self::Tokenizing => "Tokenizing",
            Self::Refining => "Refining Classes",
            Self::Encoding => "Encoding Samples",
            Self::Splitting => "Splitting",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Returns the typical weight of this stage in the overall pipeline (0.0 - 1.0).
    ///
    /// Weights of the working stages sum to 1.0.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.02,
            Self::LoadingEmbeddings => 0.20,
            Self::LoadingRecords => 0.10,
            Self::Tokenizing => 0.50,
            Self::Refining => 0.03,
            Self::Encoding => 0.10,
            Self::Splitting => 0.05,
            Self::Complete => 0.0,
            Self::Failed => 0.0,
        }
    }

    /// Returns the cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::LoadingEmbeddings => 0.02,
            Self::LoadingRecords => 0.22,
            Self::Tokenizing => 0.32,
            Self::Refining => 0.82,
            Self::Encoding => 0.85,
            Self::Splitting => 0.95,
            Self::Complete => 1.0,
            Self::Failed => 0.0,
        }
    }
}

/// Progress update with optional sub-stage and item counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current pipeline stage
    pub stage: PipelineStage,

    /// Optional sub-stage description (e.g., "Shard 3")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl ProgressUpdate {
    /// Creates a new progress update for a stage without sub-stage info.
    pub fn new(stage: PipelineStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: None,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a new progress update with item counts.
    pub fn with_items(
        stage: PipelineStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        Self {
            sub_stage: Some(sub_stage.into()),
            items_processed: Some(current),
            items_total: Some(total),
            ..Self::new(stage, stage_progress, message)
        }
    }

    /// Marks the end of a working stage.
    pub fn stage_done(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self::new(stage, 1.0, message)
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(PipelineStage::Complete, 1.0, message)
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(PipelineStage::Failed, 0.0, message)
    }
}

/// Receives progress updates from the pipeline.
///
/// Reporters must be `Send + Sync`: tokenizer workers finish on their own
/// threads, and the pipeline may itself run off the main thread.
pub trait ProgressReporter: Send + Sync {
    /// Called when progress is made. May be called once per tokenizer shard,
    /// so implementations should not block.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const WORKING: [PipelineStage; 7] = [
        PipelineStage::Initializing,
        PipelineStage::LoadingEmbeddings,
        PipelineStage::LoadingRecords,
        PipelineStage::Tokenizing,
        PipelineStage::Refining,
        PipelineStage::Encoding,
        PipelineStage::Splitting,
    ];

    #[test]
    fn test_stage_weights_sum_to_one() {
        let total: f32 = WORKING.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_base_progress_is_cumulative() {
        let mut expected = 0.0;
        for stage in WORKING {
            assert!((stage.base_progress() - expected).abs() < 0.001, "{:?}", stage);
            expected += stage.weight();
        }
    }

    #[test]
    fn test_progress_update_new() {
        let update = ProgressUpdate::new(PipelineStage::Tokenizing, 0.5, "Tokenizing");
        assert_eq!(update.stage, PipelineStage::Tokenizing);
        assert!((update.progress - 0.57).abs() < 0.001);
        assert!(update.sub_stage.is_none());
    }

    #[test]
    fn test_progress_update_with_items() {
        let update =
            ProgressUpdate::with_items(PipelineStage::Tokenizing, "Shard 2", 2, 4, "Tokenized");
        assert_eq!(update.items_processed, Some(2));
        assert_eq!(update.items_total, Some(4));
        assert!((update.stage_progress - 0.5).abs() < 0.001);
        assert_eq!(update.sub_stage.as_deref(), Some("Shard 2"));
    }

    #[test]
    fn test_stage_done_reaches_next_base() {
        for pair in WORKING.windows(2) {
            let done = ProgressUpdate::stage_done(pair[0], "done");
            assert_eq!(done.stage_progress, 1.0);
            assert!((done.progress - pair[1].base_progress()).abs() < 0.001);
        }
    }

    #[test]
    fn test_terminal_updates() {
        assert_eq!(ProgressUpdate::complete("done").progress, 1.0);
        assert_eq!(ProgressUpdate::failed("oops").stage, PipelineStage::Failed);
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ClosureProgressReporter::new(move |update: ProgressUpdate| {
            sink.lock().unwrap().push(update.stage);
        });

        reporter.report(ProgressUpdate::new(PipelineStage::Encoding, 0.0, "go"));
        reporter.report(ProgressUpdate::complete("done"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PipelineStage::Encoding, PipelineStage::Complete]
        );
    }

    #[test]
    fn test_serializes_snake_case() {
        let json =
            serde_json::to_string(&ProgressUpdate::new(PipelineStage::LoadingRecords, 0.0, "x"))
                .unwrap();
        assert!(json.contains("\"loading_records\""));
        assert!(!json.contains("sub_stage"));
    }
}
