// ============================================================
// Layer 6 - Vocabulary Store
// ============================================================
// Persists every vocabulary of a training run as a HuggingFace
// word-level tokenizer file, one per series:
//
//   <output dir>/vocab.source0.json
//   <output dir>/vocab.source1.json
//   <output dir>/vocab.target.json
//
// The tokenizer JSON is written directly instead of going
// through a tokenizers trainer; ids in the file are exactly the
// Vocabulary ids, special tokens first. Files are reloaded with
// Tokenizer::from_file so `evaluate` sees the training ids.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::domain::{
    traits::Sentence,
    vocabulary::{Vocabulary, SPECIAL_TOKEN_COUNT, UNK_TOKEN},
};

pub struct VocabularyStore {
    dir: PathBuf,
}

impl VocabularyStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("vocab.{name}.json"))
    }

    /// Load the stored vocabulary `name`, or build it from `sentences`
    /// and store it.
    pub fn load_or_build(
        &self,
        name:      &str,
        sentences: &[Sentence],
        max_size:  usize,
    ) -> Result<Vocabulary> {
        if self.path(name).exists() {
            tracing::info!("Loading existing vocabulary '{}' from disk", name);
            self.load(name)
        } else {
            let vocab = Vocabulary::from_sentences(sentences, max_size);
            self.save(name, &vocab)?;
            tracing::info!("Vocabulary '{}' built with {} tokens", name, vocab.len());
            Ok(vocab)
        }
    }

    pub fn load(&self, name: &str) -> Result<Vocabulary> {
        let tokenizer = self.tokenizer(name)?;
        let mut entries: Vec<(String, u32)> = tokenizer.get_vocab(true).into_iter().collect();
        entries.sort_by_key(|(_, id)| *id);
        Ok(Vocabulary::from_tokens(entries.into_iter().map(|(token, _)| token)))
    }

    /// The stored vocabulary as a tokenizers Tokenizer.
    pub fn tokenizer(&self, name: &str) -> Result<Tokenizer> {
        let path = self.path(name);
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load vocabulary from '{}': {}", path.display(), e))
    }

    pub fn save(&self, name: &str, vocab: &Vocabulary) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let mut map = serde_json::Map::new();
        for (id, token) in vocab.tokens().iter().enumerate() {
            map.insert(token.clone(), serde_json::json!(id));
        }

        let added_tokens: Vec<serde_json::Value> = vocab
            .tokens()
            .iter()
            .take(SPECIAL_TOKEN_COUNT)
            .enumerate()
            .map(|(id, token)| {
                serde_json::json!({
                    "id": id, "content": token, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        // HuggingFace tokenizer format, as read by Tokenizer::from_file()
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": null,
            "pre_tokenizer": {
                "type": "WhitespaceSplit"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": map,
                "unk_token": UNK_TOKEN
            }
        });

        let path = self.path(name);
        std::fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write vocabulary '{}'", path.display()))?;
        tracing::debug!("Saved vocabulary '{}' to '{}'", name, path.display());
        Ok(path)
    }
}
