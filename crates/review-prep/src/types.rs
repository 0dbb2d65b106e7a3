use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One labeled review as read from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Zero-based data row number in the source store (header excluded).
    pub id: usize,
    /// Rating on the 1-10 scale.
    pub rating: u8,
    /// Sanitized review text.
    pub comment: String,
}

impl Record {
    pub fn new(id: usize, rating: u8, comment: impl Into<String>) -> Self {
        Self {
            id,
            rating,
            comment: comment.into(),
        }
    }
}

/// A token with its part-of-speech (or script class) tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub tag: String,
}

impl Token {
    pub fn new(text: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tag: tag.into(),
        }
    }

    /// The `text/tag` form used as the vocabulary key.
    pub fn joined(&self) -> String {
        format!("{}/{}", self.text, self.tag)
    }

    /// Parse a `text/tag` unit. The tag is everything after the last `/`.
    pub fn parse_joined(unit: &str) -> Option<Self> {
        let (text, tag) = unit.rsplit_once('/')?;
        if text.is_empty() || tag.is_empty() {
            return None;
        }
        Some(Self::new(text, tag))
    }
}

/// Ordered tokens produced from one record's comment.
pub type TokenSequence = Vec<Token>;

/// A record after tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedRecord {
    pub id: usize,
    pub rating: u8,
    pub tokens: TokenSequence,
}

impl TokenizedRecord {
    /// Vocabulary keys for this record's tokens, in order.
    pub fn keys(&self) -> Vec<String> {
        self.tokens.iter().map(Token::joined).collect()
    }
}

/// Outcome of reading a record store.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Rows successfully parsed.
    pub records: Vec<Record>,
    /// Rows skipped because they could not be parsed.
    pub skipped: usize,
    /// Line numbers (1-based, header is line 1) of the first skipped rows.
    pub skipped_lines: Vec<usize>,
}

/// Human-readable summary of what the pipeline did.
///
/// Serialized by the CLI for `--json` output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSummary {
    /// RFC 3339 timestamp of when the run finished.
    pub finished_at: String,

    /// Total execution time in milliseconds.
    pub duration_ms: u64,

    /// Records parsed from the store.
    pub records_loaded: usize,
    /// Records skipped as malformed.
    pub records_skipped: usize,
    /// Records removed by majority-bucket refinement.
    pub records_refined_away: usize,

    /// Rating -> count after refinement.
    pub class_distribution: BTreeMap<u8, usize>,

    /// Total tokens produced by the tokenizer.
    pub tokens_total: usize,
    /// Tokens that were not in the vocabulary.
    pub tokens_oov: usize,
    /// Samples longer than the sequence length.
    pub samples_truncated: usize,

    /// Rows in the training split.
    pub train_rows: usize,
    /// Rows in the validation split.
    pub validation_rows: usize,
    /// Full batches per training epoch.
    pub batches_per_epoch: usize,

    /// Vocabulary size (sentinel index).
    pub vocab_size: usize,
    /// Embedding dimension.
    pub embedding_dim: usize,

    pub warnings: Vec<String>,
}

impl PipelineSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Percentage of tokens that missed the vocabulary.
    pub fn oov_percentage(&self) -> f32 {
        if self.tokens_total == 0 {
            0.0
        } else {
            (self.tokens_oov as f32 / self.tokens_total as f32) * 100.0
        }
    }
}
