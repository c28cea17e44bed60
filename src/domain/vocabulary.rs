// ============================================================
// Layer 3 - Vocabulary
// ============================================================
// An ordered set of tokens with stable integer ids.
// The size of the target vocabulary fixes the width of the
// decoder's output layer.
//
// Reserved ids:
//   0  <pad>   padding after the end of a sentence
//   1  <s>     start symbol fed to the decoder at step 0
//   2  </s>    end symbol, the last real target of a sentence
//   3  <unk>   anything not in the vocabulary
//
// A target sentence of n tokens becomes a timestep sequence
// of length max_output_len + 2:
//
//   <s> w1 w2 ... wn </s> <pad> ... <pad>
//
// and the per-target weight mask (length max_output_len + 1)
// marks the n words and the </s> with 1, the padding with 0.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const BOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

pub const PAD_ID: usize = 0;
pub const BOS_ID: usize = 1;
pub const EOS_ID: usize = 2;
pub const UNK_ID: usize = 3;

pub const SPECIAL_TOKEN_COUNT: usize = 4;

const SPECIAL_TOKENS: [&str; SPECIAL_TOKEN_COUNT] = [PAD_TOKEN, BOS_TOKEN, EOS_TOKEN, UNK_TOKEN];

/// Timestep sequence and weight mask for one target sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTarget {
    /// Length max_output_len + 2
    pub ids:     Vec<i64>,
    /// Length max_output_len + 1
    pub weights: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    tokens: Vec<String>,
    #[serde(skip)]
    index:  HashMap<String, usize>,
}

impl Vocabulary {
    /// Build a vocabulary from an explicit token list.
    /// The special tokens are always placed first, in their reserved order,
    /// and any repeated token keeps its first id.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self { tokens: Vec::new(), index: HashMap::new() };
        for special in SPECIAL_TOKENS {
            vocab.push(special.to_string());
        }
        for token in tokens {
            vocab.push(token.into());
        }
        vocab
    }

    /// Count token frequencies and keep the most frequent ones so that
    /// the vocabulary (specials included) has at most `max_size` entries.
    pub fn from_sentences(sentences: &[Vec<String>], max_size: usize) -> Self {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for sentence in sentences {
            for token in sentence {
                *freq.entry(token.as_str()).or_insert(0) += 1;
            }
        }

        let mut words: Vec<(&str, usize)> = freq
            .into_iter()
            .filter(|(w, _)| !SPECIAL_TOKENS.contains(w))
            .collect();
        // Frequency descending, then alphabetical so equal counts are stable
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        words.truncate(max_size.saturating_sub(SPECIAL_TOKENS.len()));

        Self::from_tokens(words.into_iter().map(|(w, _)| w.to_string()))
    }

    fn push(&mut self, token: String) {
        if !self.index.contains_key(&token) {
            self.index.insert(token.clone(), self.tokens.len());
            self.tokens.push(token);
        }
    }

    /// Rebuild the lookup table after deserialisation.
    pub fn reindex(&mut self) {
        self.index = self
            .tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn lookup(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    pub fn token_id(&self, token: &str) -> usize {
        self.lookup(token).unwrap_or(UNK_ID)
    }

    pub fn token(&self, id: usize) -> &str {
        self.tokens.get(id).map(String::as_str).unwrap_or(UNK_TOKEN)
    }

    /// Encode a target sentence as a `<s> ... </s> <pad>...` timestep
    /// sequence together with its loss weights.
    pub fn encode_target(&self, sentence: &[String], max_output_len: usize) -> EncodedTarget {
        let mut ids = Vec::with_capacity(max_output_len + 2);
        ids.push(BOS_ID as i64);
        ids.extend(
            sentence
                .iter()
                .take(max_output_len)
                .map(|t| self.token_id(t) as i64),
        );
        ids.push(EOS_ID as i64);

        // Every real word and the closing </s> are targets
        let n_targets = ids.len() - 1;
        ids.resize(max_output_len + 2, PAD_ID as i64);

        let mut weights = vec![0.0f32; max_output_len + 1];
        weights[..n_targets].iter_mut().for_each(|w| *w = 1.0);

        EncodedTarget { ids, weights }
    }

    /// Encode a source sentence: truncated tokens followed by `</s>`.
    pub fn encode_source(&self, sentence: &[String], max_len: usize) -> Vec<i64> {
        sentence
            .iter()
            .take(max_len)
            .map(|t| self.token_id(t) as i64)
            .chain(std::iter::once(EOS_ID as i64))
            .collect()
    }

    /// Map decoded ids back to tokens, stopping at the first `</s>`.
    pub fn decode(&self, ids: &[usize]) -> Vec<String> {
        ids.iter()
            .take_while(|&&id| id != EOS_ID)
            .filter(|&&id| id != PAD_ID && id != BOS_ID)
            .map(|&id| self.token(id).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split(' ').map(str::to_string).collect()
    }

    #[test]
    fn test_specials_have_reserved_ids() {
        let v = Vocabulary::from_tokens(["a", "b"]);
        assert_eq!(v.lookup(PAD_TOKEN), Some(PAD_ID));
        assert_eq!(v.lookup(BOS_TOKEN), Some(BOS_ID));
        assert_eq!(v.lookup(EOS_TOKEN), Some(EOS_ID));
        assert_eq!(v.lookup(UNK_TOKEN), Some(UNK_ID));
        assert_eq!(v.lookup("a"), Some(4));
        assert_eq!(v.len(), 6);
    }

    #[test]
    fn test_from_sentences_keeps_most_frequent() {
        let corpus = vec![words("a b a c"), words("a b")];
        let v = Vocabulary::from_sentences(&corpus, 6);
        assert_eq!(v.len(), 6);
        assert_eq!(v.token(4), "a");
        assert_eq!(v.token(5), "b");
        assert_eq!(v.lookup("c"), None);
        assert_eq!(v.token_id("c"), UNK_ID);
    }

    #[test]
    fn test_encode_target_layout() {
        let v = Vocabulary::from_tokens(["x", "y"]);
        let enc = v.encode_target(&words("x y"), 4);
        assert_eq!(enc.ids, vec![1, 4, 5, 2, 0, 0]);
        assert_eq!(enc.weights, vec![1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encode_target_truncates() {
        let v = Vocabulary::from_tokens(["x"]);
        let enc = v.encode_target(&words("x x x x"), 2);
        assert_eq!(enc.ids, vec![1, 4, 4, 2]);
        assert_eq!(enc.weights, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_decode_stops_at_eos() {
        let v = Vocabulary::from_tokens(["x", "y"]);
        assert_eq!(v.decode(&[4, 0, 5, 2, 4]), vec!["x", "y"]);
    }

    #[test]
    fn test_reindex_after_deserialise() {
        let v = Vocabulary::from_tokens(["x"]);
        let json = serde_json::to_string(&v).unwrap();
        let mut back: Vocabulary = serde_json::from_str(&json).unwrap();
        back.reindex();
        assert_eq!(back.lookup("x"), Some(4));
    }
}
