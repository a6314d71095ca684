//! Dictionary tokens and the container that keeps them usable by the
//! deterministic extras stages.

use ahash::AHashSet;
use derive_more::Deref;
use serde::{Deserialize, Serialize};

/// One user-supplied or auto-inferred token.
#[derive(Debug, Clone, PartialEq, Eq, Deref, Serialize, Deserialize)]
pub struct DictToken(Vec<u8>);

impl DictToken {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Token store ordered by ascending token length.
///
/// The ordering is load-bearing: the overwrite stages restore an offset once
/// per outer iteration, using the length of the *last* token written there.
/// Walking tokens shortest-first guarantees that single restore covers every
/// earlier, shorter write at the same offset.
#[derive(Debug, Default)]
pub struct Dictionary {
    tokens: Vec<DictToken>,
    seen: AHashSet<Vec<u8>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a token, preserving the length ordering. Duplicates and empty
    /// tokens are rejected; returns whether the token was added.
    pub fn insert(&mut self, data: &[u8]) -> bool {
        if data.is_empty() || !self.seen.insert(data.to_vec()) {
            return false;
        }
        let at = self.tokens.partition_point(|t| t.len() <= data.len());
        self.tokens.insert(at, DictToken::new(data));
        true
    }

    pub fn tokens(&self) -> &[DictToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<T: Into<Vec<u8>>> FromIterator<T> for Dictionary {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut dict = Self::new();
        for item in iter {
            dict.insert(&item.into());
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::{Rand, StdRand};

    use super::*;

    #[test]
    fn duplicates_and_empties_are_rejected() {
        let mut dict = Dictionary::new();
        assert!(dict.insert(b"GET"));
        assert!(!dict.insert(b"GET"));
        assert!(!dict.insert(b""));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn insertion_keeps_length_order() {
        let mut rng = StdRand::with_seed(0x5eed);
        let mut dict = Dictionary::new();
        for _ in 0..200 {
            let len = 1 + rng.below_or_zero(24);
            let token: Vec<u8> = (0..len).map(|_| rng.below_or_zero(256) as u8).collect();
            dict.insert(&token);
        }
        let lengths: Vec<usize> = dict.tokens().iter().map(|t| t.len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn from_iter_sorts_by_length() {
        let dict: Dictionary = [b"longest".to_vec(), b"a".to_vec(), b"mid".to_vec()]
            .into_iter()
            .collect();
        let lengths: Vec<usize> = dict.tokens().iter().map(|t| t.len()).collect();
        assert_eq!(lengths, vec![1, 3, 7]);
    }
}
