//! Text normalization and tokenization.

pub mod normalizer;
pub mod parallel;
pub mod tokenizer;

pub use normalizer::{Normalizer, sanitize_comment};
pub use parallel::tokenize_records;
pub use tokenizer::{ScriptTokenizer, TextProcessor, Tokenizer};
