//! Pre-trained embedding tables.
//!
//! Tables are read once from the word2vec text format
//!
//! ```text
//! <count> <dim>
//! token v1 v2 ... vD
//! ...
//! ```
//!
//! where a token's index is its line order. Lookups are hash-map backed, so
//! the file is parsed exactly once regardless of table size.

mod vocabulary;

pub use vocabulary::Vocabulary;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, ResultExt};

/// Upper bounds on what the header may reserve before any line is read.
const PREALLOC_ROWS: usize = 1 << 16;
const PREALLOC_COMPONENTS: usize = 1 << 24;

/// Token vectors plus their vocabulary.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    vocabulary: Vocabulary,
    vectors: Vec<f32>,
    dimension: usize,
}

static_assertions::assert_impl_all!(EmbeddingTable: Send, Sync);

impl EmbeddingTable {
    /// Build a table from tokens and their row-major vectors.
    pub fn new(tokens: Vec<String>, vectors: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(PipelineError::InvalidArgument(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if vectors.len() != tokens.len() * dimension {
            return Err(PipelineError::InvalidArgument(format!(
                "{} tokens need {} vector components, got {}",
                tokens.len(),
                tokens.len() * dimension,
                vectors.len()
            )));
        }
        Ok(Self {
            vocabulary: Vocabulary::from_tokens(tokens)?,
            vectors,
            dimension,
        })
    }

    /// Load a word2vec text file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading embeddings from: {}", path.display());
        let file = File::open(path).context(format!("opening {}", path.display()))?;
        Self::parse(BufReader::new(file)).context(format!("reading embeddings {}", path.display()))
    }

    /// Parse the word2vec text format from any buffered reader.
    ///
    /// Errors come back wrapped in context: a broken table is never a
    /// skippable row.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Self::parse(reader).context("parsing embedding table")
    }

    fn parse<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(PipelineError::format(1, "missing '<count> <dim>' header"));
        }
        let (count, dimension) = parse_header(&line)?;

        let rows = count.min(PREALLOC_ROWS);
        let mut tokens = Vec::with_capacity(rows);
        let mut vectors = Vec::with_capacity((rows * dimension).min(PREALLOC_COMPONENTS));
        let mut line_no = 1;

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let token = parts
                .next()
                .ok_or_else(|| PipelineError::format(line_no, "missing token"))?;

            let before = vectors.len();
            for part in parts {
                let value: f32 = part.parse().map_err(|_| {
                    PipelineError::format(line_no, format!("'{}' is not a number", part))
                })?;
                vectors.push(value);
            }
            let found = vectors.len() - before;
            if found != dimension {
                return Err(PipelineError::format(
                    line_no,
                    format!("expected {} components for '{}', found {}", dimension, token, found),
                ));
            }
            tokens.push(token.to_string());
        }

        if tokens.len() != count {
            return Err(PipelineError::format(
                line_no,
                format!("header declares {} vectors, found {}", count, tokens.len()),
            ));
        }

        let vocabulary = Vocabulary::from_tokens(tokens).map_err(|e| match e {
            PipelineError::InvalidArgument(reason) => PipelineError::format(line_no, reason),
            other => other,
        })?;

        debug!(
            "Parsed {} vectors of dimension {}",
            vocabulary.len(),
            dimension
        );

        Ok(Self {
            vocabulary,
            vectors,
            dimension,
        })
    }

    /// Check the table against the configured dimension and vocabulary size.
    pub fn check_config(&self, config: &PipelineConfig) -> Result<()> {
        if self.dimension != config.embedding_dim {
            return Err(PipelineError::Configuration(format!(
                "embedding_dim is {} but the table has dimension {}",
                config.embedding_dim, self.dimension
            )));
        }
        if let Some(expected) = config.vocab_size
            && expected != self.size()
        {
            return Err(PipelineError::Configuration(format!(
                "vocab_size is {} but the table holds {} tokens",
                expected,
                self.size()
            )));
        }
        Ok(())
    }

    /// Index of `token`, or the sentinel for unknown tokens.
    #[inline]
    pub fn index_of(&self, token: &str) -> u32 {
        self.vocabulary.index_of(token)
    }

    /// Vector for `token`, if present.
    pub fn vector_of(&self, token: &str) -> Option<&[f32]> {
        self.vocabulary
            .get(token)
            .and_then(|idx| self.vector_at(idx as usize))
    }

    /// Vector stored at `index`.
    pub fn vector_at(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Number of tokens (V); also the sentinel index.
    pub fn size(&self) -> usize {
        self.vocabulary.size()
    }

    /// Vector dimension (D).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Row-major `(V + 1) x D` matrix with a zero sentinel row appended.
    ///
    /// Suitable for initializing a frozen embedding layer that is indexed
    /// by encoded samples.
    pub fn lookup_matrix(&self) -> Vec<f32> {
        let mut matrix = Vec::with_capacity(self.vectors.len() + self.dimension);
        matrix.extend_from_slice(&self.vectors);
        matrix.resize(self.vectors.len() + self.dimension, 0.0);
        matrix
    }
}

fn parse_header(line: &str) -> Result<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let mut next_number = |what: &str| -> Result<usize> {
        parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| PipelineError::format(1, format!("header is missing the {}", what)))
    };
    let count = next_number("vector count")?;
    let dimension = next_number("dimension")?;
    if dimension == 0 {
        return Err(PipelineError::format(1, "dimension must be positive"));
    }
    if count.checked_mul(dimension).is_none() {
        return Err(PipelineError::format(
            1,
            format!("{} vectors of dimension {} cannot be addressed", count, dimension),
        ));
    }
    Ok((count, dimension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMALL: &str = "3 2\n영화/Hangul 0.1 0.2\n좋다/Hangul 0.3 0.4\n!/Punct 0.5 0.6\n";

    fn small() -> EmbeddingTable {
        EmbeddingTable::from_reader(Cursor::new(SMALL)).unwrap()
    }

    #[test]
    fn test_parse_word2vec_text() {
        let table = small();
        assert_eq!(table.size(), 3);
        assert_eq!(table.dimension(), 2);
        assert_eq!(table.index_of("좋다/Hangul"), 1);
        assert_eq!(table.vector_of("!/Punct"), Some(&[0.5, 0.6][..]));
    }

    #[test]
    fn test_unknown_token_lookup() {
        let table = small();
        assert_eq!(table.index_of("없다/Hangul"), 3);
        assert!(table.vector_of("없다/Hangul").is_none());
        assert!(table.vector_at(3).is_none());
    }

    #[test]
    fn test_lookup_matrix_has_zero_sentinel_row() {
        let matrix = small().lookup_matrix();
        assert_eq!(matrix.len(), 4 * 2);
        assert_eq!(&matrix[6..], &[0.0, 0.0]);
        assert_eq!(&matrix[0..2], &[0.1, 0.2]);
    }

    #[test]
    fn test_bad_header() {
        let err = EmbeddingTable::parse(Cursor::new("three 2\n")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { line: 1, .. }));
        let err = EmbeddingTable::parse(Cursor::new("")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { line: 1, .. }));
    }

    #[test]
    fn test_oversized_header_is_a_format_error() {
        let err = EmbeddingTable::parse(Cursor::new("18446744073709551615 300\na 0.1\n"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Format { line: 1, .. }));

        // addressable but huge: fails on the count, not on allocation
        let err = EmbeddingTable::parse(Cursor::new("5000000 300\na 0.1\n")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { line: 2, .. }));
    }

    #[test]
    fn test_wrong_component_count() {
        let err = EmbeddingTable::parse(Cursor::new("1 3\na 0.1 0.2\n")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { line: 2, .. }));
    }

    #[test]
    fn test_table_errors_are_fatal() {
        let err = EmbeddingTable::from_reader(Cursor::new("1 3\na 0.1 0.2\n")).unwrap_err();
        assert_eq!(err.error_code(), "FORMAT_ERROR");
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("parsing embedding table"));
    }

    #[test]
    fn test_count_mismatch_and_duplicates() {
        assert!(EmbeddingTable::from_reader(Cursor::new("2 1\na 0.1\n")).is_err());
        let err = EmbeddingTable::from_reader(Cursor::new("2 1\na 0.1\na 0.2\n")).unwrap_err();
        assert_eq!(err.error_code(), "FORMAT_ERROR");
    }

    #[test]
    fn test_check_config() {
        let table = small();
        let ok = PipelineConfig::builder().embedding_dim(2).vocab_size(3).build().unwrap();
        assert!(table.check_config(&ok).is_ok());

        let wrong_dim = PipelineConfig::builder().embedding_dim(300).build().unwrap();
        assert!(matches!(
            table.check_config(&wrong_dim),
            Err(PipelineError::Configuration(_))
        ));

        let wrong_vocab = PipelineConfig::builder().embedding_dim(2).vocab_size(251).build().unwrap();
        assert!(matches!(
            table.check_config(&wrong_vocab),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_new_validates_shape() {
        assert!(EmbeddingTable::new(vec!["a".into()], vec![0.0, 1.0], 2).is_ok());
        assert!(EmbeddingTable::new(vec!["a".into()], vec![0.0], 2).is_err());
        assert!(EmbeddingTable::new(vec![], vec![], 0).is_err());
    }
}
