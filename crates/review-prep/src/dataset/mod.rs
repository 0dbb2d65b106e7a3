//! In-memory datasets of encoded samples and labels.
//!
//! A [`Dataset`] is built once and then only re-sliced: splitting and
//! batching gather rows into new values and never touch the original.

pub mod batch;
pub mod loader;
pub mod refine;
pub mod split;

pub use batch::{Batch, BatchIterator, Epoch, EpochState};
pub use loader::{RecordStore, TokenizedCorpus};
pub use refine::{Rated, RefineOutcome, class_distribution, downsample_majority, majority_rating};
pub use split::{split, split_indices};

use tracing::{debug, warn};

use crate::config::{EmbeddingMode, LabelEncoding};
use crate::embedding::EmbeddingTable;
use crate::encoder::{EncodingStats, SequenceEncoder};
use crate::error::{PipelineError, Result};
use crate::types::TokenizedRecord;

/// Row-major feature storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    /// Vocabulary indices, one row per sample (word embeddings).
    Indices(Vec<u32>),
    /// Dense vectors, one row per sample (document embeddings).
    Dense(Vec<f32>),
}

impl Features {
    fn empty_like(&self, capacity: usize) -> Self {
        match self {
            Features::Indices(_) => Features::Indices(Vec::with_capacity(capacity)),
            Features::Dense(_) => Features::Dense(Vec::with_capacity(capacity)),
        }
    }

    fn raw_len(&self) -> usize {
        match self {
            Features::Indices(v) => v.len(),
            Features::Dense(v) => v.len(),
        }
    }

    fn extend_row(&mut self, from: &Features, start: usize, end: usize) {
        match (self, from) {
            (Features::Indices(dst), Features::Indices(src)) => {
                dst.extend_from_slice(&src[start..end])
            }
            (Features::Dense(dst), Features::Dense(src)) => dst.extend_from_slice(&src[start..end]),
            _ => unreachable!("feature kinds are fixed per dataset"),
        }
    }
}

/// A borrowed view of one feature row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureRow<'a> {
    Indices(&'a [u32]),
    Dense(&'a [f32]),
}

/// Encode a label according to `encoding`.
///
/// One-hot encoding covers ratings `1..=n_classes`; anything outside is a
/// configuration mismatch, not a bad record.
pub fn encode_label(rating: u8, encoding: LabelEncoding) -> Result<Vec<f32>> {
    match encoding {
        LabelEncoding::Scalar => Ok(vec![rating as f32]),
        LabelEncoding::OneHot { n_classes } => {
            let position = (rating as usize).checked_sub(1).filter(|&p| p < n_classes);
            let Some(position) = position else {
                return Err(PipelineError::Configuration(format!(
                    "rating {} is outside the configured class range 1..={}",
                    rating, n_classes
                )));
            };
            let mut row = vec![0.0; n_classes];
            row[position] = 1.0;
            Ok(row)
        }
    }
}

/// Ordered samples with aligned labels and source record ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    ids: Vec<usize>,
    features: Features,
    feature_width: usize,
    labels: Vec<f32>,
    label_encoding: LabelEncoding,
}

impl Dataset {
    /// Encode tokenized records into a dataset.
    ///
    /// In word mode each record becomes `encoder.length()` vocabulary
    /// indices. In document mode each record becomes the table vector
    /// tagged with its record id; records missing from the table get a zero
    /// vector.
    pub fn from_tokenized(
        records: &[TokenizedRecord],
        table: &EmbeddingTable,
        mode: EmbeddingMode,
        encoder: SequenceEncoder,
        label_encoding: LabelEncoding,
    ) -> Result<(Self, EncodingStats)> {
        let mut stats = EncodingStats::default();
        let mut builder = match mode {
            EmbeddingMode::Word => DatasetBuilder::indices(encoder.length(), label_encoding),
            EmbeddingMode::Document => DatasetBuilder::dense(table.dimension(), label_encoding),
        };

        let zeros = vec![0.0; table.dimension()];
        let mut missing_documents = 0;

        for record in records {
            match mode {
                EmbeddingMode::Word => {
                    let keys = record.keys();
                    let row = encoder.encode_counting(&keys, table.vocabulary(), &mut stats);
                    builder.push_indices(record.id, &row, record.rating)?;
                }
                EmbeddingMode::Document => {
                    stats.tokens += record.tokens.len();
                    let vector = table.vector_of(&record.id.to_string()).unwrap_or_else(|| {
                        missing_documents += 1;
                        zeros.as_slice()
                    });
                    builder.push_dense(record.id, vector, record.rating)?;
                }
            }
        }

        if missing_documents > 0 {
            warn!(
                "{} records have no document vector; using zero vectors",
                missing_documents
            );
        }
        stats.oov += missing_documents;

        debug!(
            "Encoded {} samples ({} tokens, {} OOV, {} truncated)",
            records.len(),
            stats.tokens,
            stats.oov,
            stats.truncated
        );
        Ok((builder.finish(), stats))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Source record ids, one per row.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Row-major labels, `label_width()` values per row.
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Sequence length in word mode, embedding dimension in document mode.
    pub fn feature_width(&self) -> usize {
        self.feature_width
    }

    pub fn label_width(&self) -> usize {
        self.label_encoding.width()
    }

    pub fn label_encoding(&self) -> LabelEncoding {
        self.label_encoding
    }

    pub fn feature_row(&self, row: usize) -> Option<FeatureRow<'_>> {
        let start = row.checked_mul(self.feature_width)?;
        let end = start + self.feature_width;
        match &self.features {
            Features::Indices(v) => v.get(start..end).map(FeatureRow::Indices),
            Features::Dense(v) => v.get(start..end).map(FeatureRow::Dense),
        }
    }

    pub fn label_row(&self, row: usize) -> Option<&[f32]> {
        let width = self.label_width();
        let start = row.checked_mul(width)?;
        self.labels.get(start..start + width)
    }

    /// New dataset holding `rows` in the given order.
    ///
    /// # Panics
    ///
    /// Panics if any row index is out of bounds.
    pub fn select(&self, rows: &[usize]) -> Dataset {
        let (ids, features, labels) = self.gather(rows);
        Dataset {
            ids,
            features,
            feature_width: self.feature_width,
            labels,
            label_encoding: self.label_encoding,
        }
    }

    fn gather(&self, rows: &[usize]) -> (Vec<usize>, Features, Vec<f32>) {
        let fw = self.feature_width;
        let lw = self.label_width();
        let mut ids = Vec::with_capacity(rows.len());
        let mut features = self.features.empty_like(rows.len() * fw);
        let mut labels = Vec::with_capacity(rows.len() * lw);

        for &row in rows {
            ids.push(self.ids[row]);
            features.extend_row(&self.features, row * fw, (row + 1) * fw);
            labels.extend_from_slice(&self.labels[row * lw..(row + 1) * lw]);
        }
        (ids, features, labels)
    }
}

/// Accumulates rows for a [`Dataset`], enforcing fixed widths.
#[derive(Debug)]
pub struct DatasetBuilder {
    inner: Dataset,
}

impl DatasetBuilder {
    /// Builder for index rows of `width` entries.
    pub fn indices(width: usize, label_encoding: LabelEncoding) -> Self {
        Self::with_features(Features::Indices(Vec::new()), width, label_encoding)
    }

    /// Builder for dense rows of `width` entries.
    pub fn dense(width: usize, label_encoding: LabelEncoding) -> Self {
        Self::with_features(Features::Dense(Vec::new()), width, label_encoding)
    }

    fn with_features(features: Features, width: usize, label_encoding: LabelEncoding) -> Self {
        Self {
            inner: Dataset {
                ids: Vec::new(),
                features,
                feature_width: width,
                labels: Vec::new(),
                label_encoding,
            },
        }
    }

    pub fn push_indices(&mut self, id: usize, row: &[u32], rating: u8) -> Result<()> {
        self.check_width(row.len())?;
        let label = encode_label(rating, self.inner.label_encoding)?;
        match &mut self.inner.features {
            Features::Indices(v) => v.extend_from_slice(row),
            Features::Dense(_) => {
                return Err(PipelineError::InvalidArgument(
                    "index row pushed into a dense dataset".to_string(),
                ));
            }
        }
        self.push_common(id, label);
        Ok(())
    }

    pub fn push_dense(&mut self, id: usize, row: &[f32], rating: u8) -> Result<()> {
        self.check_width(row.len())?;
        let label = encode_label(rating, self.inner.label_encoding)?;
        match &mut self.inner.features {
            Features::Dense(v) => v.extend_from_slice(row),
            Features::Indices(_) => {
                return Err(PipelineError::InvalidArgument(
                    "dense row pushed into an index dataset".to_string(),
                ));
            }
        }
        self.push_common(id, label);
        Ok(())
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.inner.feature_width {
            return Err(PipelineError::InvalidArgument(format!(
                "row has width {}, dataset expects {}",
                width, self.inner.feature_width
            )));
        }
        Ok(())
    }

    fn push_common(&mut self, id: usize, label: Vec<f32>) {
        self.inner.ids.push(id);
        self.inner.labels.extend(label);
    }

    pub fn finish(self) -> Dataset {
        debug_assert_eq!(
            self.inner.features.raw_len(),
            self.inner.ids.len() * self.inner.feature_width
        );
        self.inner
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Token;

    /// Index dataset where row `i` is `[i; width]` and the rating cycles 1..=10.
    pub(crate) fn numbered(n: usize, width: usize) -> Dataset {
        let mut builder = DatasetBuilder::indices(width, LabelEncoding::Scalar);
        for i in 0..n {
            builder
                .push_indices(i, &vec![i as u32; width], (i % 10 + 1) as u8)
                .unwrap();
        }
        builder.finish()
    }

    #[test]
    fn test_encode_label_one_hot() {
        let row = encode_label(3, LabelEncoding::OneHot { n_classes: 10 }).unwrap();
        assert_eq!(row.len(), 10);
        assert_eq!(row[2], 1.0);
        assert_eq!(row.iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_encode_label_out_of_range_is_configuration_error() {
        let err = encode_label(10, LabelEncoding::OneHot { n_classes: 5 }).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(encode_label(0, LabelEncoding::OneHot { n_classes: 5 }).is_err());
    }

    #[test]
    fn test_encode_label_scalar() {
        assert_eq!(encode_label(7, LabelEncoding::Scalar).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_builder_rejects_wrong_width() {
        let mut builder = DatasetBuilder::indices(3, LabelEncoding::Scalar);
        assert!(builder.push_indices(0, &[1, 2], 5).is_err());
        assert!(builder.push_dense(0, &[1.0, 2.0, 3.0], 5).is_err());
    }

    #[test]
    fn test_select_gathers_rows_in_order() {
        let ds = numbered(5, 2);
        let picked = ds.select(&[4, 1]);
        assert_eq!(picked.ids(), &[4, 1]);
        assert_eq!(picked.feature_row(0), Some(FeatureRow::Indices(&[4, 4])));
        assert_eq!(picked.label_row(1), Some(&[2.0][..]));
        // original untouched
        assert_eq!(ds.len(), 5);
    }

    fn tokenized(id: usize, rating: u8, words: &[&str]) -> TokenizedRecord {
        TokenizedRecord {
            id,
            rating,
            tokens: words.iter().map(|w| Token::new(*w, "T")).collect(),
        }
    }

    #[test]
    fn test_from_tokenized_word_mode() {
        let table = EmbeddingTable::new(
            vec!["a/T".into(), "b/T".into()],
            vec![0.1, 0.2, 0.3, 0.4],
            2,
        )
        .unwrap();
        let records = vec![tokenized(0, 10, &["a", "x", "b"]), tokenized(1, 1, &[])];

        let (ds, stats) = Dataset::from_tokenized(
            &records,
            &table,
            EmbeddingMode::Word,
            SequenceEncoder::new(4),
            LabelEncoding::OneHot { n_classes: 10 },
        )
        .unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.feature_width(), 4);
        assert_eq!(ds.feature_row(0), Some(FeatureRow::Indices(&[0, 2, 1, 2])));
        assert_eq!(ds.feature_row(1), Some(FeatureRow::Indices(&[2, 2, 2, 2])));
        assert_eq!(ds.label_row(0).unwrap()[9], 1.0);
        assert_eq!(stats.oov, 1);
        assert_eq!(stats.empty, 1);
    }

    #[test]
    fn test_from_tokenized_document_mode() {
        let table =
            EmbeddingTable::new(vec!["0".into(), "7".into()], vec![1.0, 2.0, 3.0, 4.0], 2)
                .unwrap();
        let records = vec![tokenized(7, 4, &["a"]), tokenized(3, 5, &["b"])];

        let (ds, stats) = Dataset::from_tokenized(
            &records,
            &table,
            EmbeddingMode::Document,
            SequenceEncoder::new(10),
            LabelEncoding::Scalar,
        )
        .unwrap();

        assert_eq!(ds.feature_width(), 2);
        assert_eq!(ds.feature_row(0), Some(FeatureRow::Dense(&[3.0, 4.0])));
        assert_eq!(ds.feature_row(1), Some(FeatureRow::Dense(&[0.0, 0.0])));
        assert_eq!(stats.oov, 1);
    }
}
