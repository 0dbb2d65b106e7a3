//! Tokenizers turning normalized text into tagged tokens.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::text::normalizer::Normalizer;
use crate::types::{Token, TokenSequence};

/// Splits text into (token, tag) units.
///
/// Implementations must be `Send + Sync`: one instance is shared by all
/// tokenizer workers. A morphological analyzer for the target language can
/// be plugged in here; [`ScriptTokenizer`] is the built-in fallback.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> TokenSequence;
}

static SCRIPT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<hangul>[\u{AC00}-\u{D7A3}]+)
        | (?P<jamo>[\u{3131}-\u{318E}]+)
        | (?P<alpha>[A-Za-z]+)
        | (?P<number>[0-9]+(?:[.,][0-9]+)*)
        | (?P<foreign>\p{L}+)
        | (?P<punct>\S)
        ",
    )
    .expect("valid regex")
});

const SCRIPT_TAGS: [(&str, &str); 6] = [
    ("hangul", "Hangul"),
    ("jamo", "Jamo"),
    ("alpha", "Alpha"),
    ("number", "Number"),
    ("foreign", "Foreign"),
    ("punct", "Punct"),
];

/// Tokenizer that splits on script boundaries and tags each run by script.
///
/// Latin runs are lowercased so `Good` and `good` share an entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptTokenizer;

impl Tokenizer for ScriptTokenizer {
    fn tokenize(&self, text: &str) -> TokenSequence {
        SCRIPT_PATTERN
            .captures_iter(text)
            .filter_map(|caps| {
                SCRIPT_TAGS.iter().find_map(|(group, tag)| {
                    caps.name(group).map(|m| {
                        let text = if *group == "alpha" {
                            m.as_str().to_ascii_lowercase()
                        } else {
                            m.as_str().to_string()
                        };
                        Token::new(text, *tag)
                    })
                })
            })
            .collect()
    }
}

/// Normalizer plus tokenizer, the unit of work for one comment.
#[derive(Clone)]
pub struct TextProcessor {
    normalizer: Normalizer,
    tokenizer: Arc<dyn Tokenizer>,
}

static_assertions::assert_impl_all!(TextProcessor: Send, Sync);

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new(Normalizer::default(), Arc::new(ScriptTokenizer))
    }
}

impl TextProcessor {
    pub fn new(normalizer: Normalizer, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            normalizer,
            tokenizer,
        }
    }

    /// Normalize then tokenize one comment.
    pub fn process(&self, comment: &str) -> TokenSequence {
        let normalized = self.normalizer.normalize(comment);
        self.tokenizer.tokenize(&normalized)
    }
}

impl std::fmt::Debug for TextProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextProcessor")
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}
