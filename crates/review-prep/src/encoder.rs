//! Fixed-length sequence encoding.
//!
//! Every sample handed to the model has exactly `length` indices. Longer
//! token sequences keep their first `length` tokens; shorter ones are
//! right-padded. Unknown tokens and padding share one sentinel index
//! (`vocab.sentinel()`), so a single zero row in the lookup matrix covers
//! both.

use serde::{Deserialize, Serialize};

use crate::embedding::Vocabulary;

/// A fixed-length row of vocabulary indices.
pub type EncodedSample = Vec<u32>;

/// Encode `tokens` against `vocab` into exactly `length` indices.
///
/// Pure function of its inputs: truncation keeps the prefix, unknown tokens
/// map to the sentinel, and the tail is filled with the sentinel.
pub fn encode<S: AsRef<str>>(tokens: &[S], vocab: &Vocabulary, length: usize) -> EncodedSample {
    let sentinel = vocab.sentinel();
    let mut sample = Vec::with_capacity(length);
    sample.extend(
        tokens
            .iter()
            .take(length)
            .map(|token| vocab.index_of(token.as_ref())),
    );
    sample.resize(length, sentinel);
    sample
}

/// Counters collected while encoding many samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingStats {
    /// Tokens seen before truncation.
    pub tokens: usize,
    /// Retained tokens that mapped to the sentinel.
    pub oov: usize,
    /// Samples that were cut to fit.
    pub truncated: usize,
    /// Samples with no tokens at all.
    pub empty: usize,
}

/// Encoder bound to one sequence length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceEncoder {
    length: usize,
}

impl SequenceEncoder {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn encode<S: AsRef<str>>(&self, tokens: &[S], vocab: &Vocabulary) -> EncodedSample {
        encode(tokens, vocab, self.length)
    }

    /// Encode one sample and fold its counters into `stats`.
    pub fn encode_counting<S: AsRef<str>>(
        &self,
        tokens: &[S],
        vocab: &Vocabulary,
        stats: &mut EncodingStats,
    ) -> EncodedSample {
        let sample = self.encode(tokens, vocab);
        let retained = tokens.len().min(self.length);

        stats.tokens += tokens.len();
        stats.oov += tokens[..retained]
            .iter()
            .filter(|t| !vocab.contains(t.as_ref()))
            .count();
        if tokens.len() > self.length {
            stats.truncated += 1;
        }
        if tokens.is_empty() {
            stats.empty += 1;
        }
        sample
    }
}
