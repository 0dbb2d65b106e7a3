use std::collections::HashMap;

use crate::error::{PipelineError, Result};

/// Token to index mapping with a reserved sentinel index.
///
/// Indices live in `0..size()`. The sentinel equals `size()` and stands for
/// both padding and out-of-vocabulary tokens, so every encoded value is in
/// `0..=size()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    index: HashMap<String, u32>,
    size: usize,
}

impl Vocabulary {
    /// Assign indices in iteration order.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = HashMap::new();
        for token in tokens {
            let next = index.len() as u32;
            let token = token.into();
            if index.contains_key(&token) {
                return Err(PipelineError::InvalidArgument(format!(
                    "duplicate vocabulary token '{}'",
                    token
                )));
            }
            index.insert(token, next);
        }
        let size = index.len();
        Ok(Self { index, size })
    }

    /// Use explicit indices. The index space is sized to the largest index + 1.
    pub fn from_indices<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut index: HashMap<String, u32> = HashMap::new();
        let mut taken: HashMap<u32, String> = HashMap::new();
        for (token, idx) in pairs {
            let token = token.into();
            if let Some(other) = taken.get(&idx) {
                return Err(PipelineError::InvalidArgument(format!(
                    "index {} assigned to both '{}' and '{}'",
                    idx, other, token
                )));
            }
            if index.contains_key(&token) {
                return Err(PipelineError::InvalidArgument(format!(
                    "duplicate vocabulary token '{}'",
                    token
                )));
            }
            taken.insert(idx, token.clone());
            index.insert(token, idx);
        }
        let size = index.values().max().map_or(0, |&max| max as usize + 1);
        Ok(Self { index, size })
    }

    /// Index of `token`, or the sentinel when it is unknown.
    #[inline]
    pub fn index_of(&self, token: &str) -> u32 {
        self.get(token).unwrap_or_else(|| self.sentinel())
    }

    #[inline]
    pub fn get(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Width of the index space (V).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tokens in the mapping.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The shared padding / unknown index, equal to `size()`.
    #[inline]
    pub fn sentinel(&self) -> u32 {
        self.size as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_assigns_in_order() {
        let vocab = Vocabulary::from_tokens(["a", "b", "c"]).unwrap();
        assert_eq!(vocab.index_of("a"), 0);
        assert_eq!(vocab.index_of("c"), 2);
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.sentinel(), 3);
    }

    #[test]
    fn test_unknown_token_is_sentinel() {
        let vocab = Vocabulary::from_tokens(["a"]).unwrap();
        assert_eq!(vocab.index_of("zzz"), vocab.sentinel());
        assert_eq!(vocab.get("zzz"), None);
    }

    #[test]
    fn test_from_indices_sizes_to_max() {
        let vocab = Vocabulary::from_indices([("a", 1), ("b", 2)]).unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.sentinel(), 3);
    }

    #[test]
    fn test_duplicates_rejected() {
        assert!(Vocabulary::from_tokens(["a", "a"]).is_err());
        assert!(Vocabulary::from_indices([("a", 0), ("b", 0)]).is_err());
        assert!(Vocabulary::from_indices([("a", 0), ("a", 1)]).is_err());
    }

    #[test]
    fn test_empty_vocabulary() {
        let vocab = Vocabulary::from_tokens(Vec::<String>::new()).unwrap();
        assert!(vocab.is_empty());
        assert_eq!(vocab.sentinel(), 0);
    }
}
