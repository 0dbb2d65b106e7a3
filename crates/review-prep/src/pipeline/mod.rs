//! Pipeline module.
//!
//! This module provides the preprocessing pipeline and its progress types.

mod builder;
pub mod progress;

pub use builder::{Pipeline, PipelineBuilder, PreparedData};
pub use progress::{ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate};
