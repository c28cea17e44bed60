use burn::prelude::*;

use crate::data::batcher::Seq2SeqBatch;
use crate::ml::decoder::{CopySource, Decoder, DecoderConfig, DecoderInput, DecoderOutput};
use crate::ml::encoder::{SentenceEncoder, SentenceEncoderConfig};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally, so they are not derived again here.
#[derive(Config, Debug)]
pub struct Seq2SeqConfig {
    /// One entry per source series; empty trains a language model
    pub source_vocab_sizes: Vec<usize>,
    pub target_vocab_size:  usize,
    pub embedding_size:     usize,
    pub encoder_rnn_size:   usize,
    pub rnn_size:           usize,
    pub max_output_len:     usize,
    #[config(default = true)]
    pub use_attention:      bool,
    #[config(default = 64)]
    pub attention_dim:      usize,
    /// Source series the decoder may copy tokens from
    pub copy_from:          Option<usize>,
    pub scheduled_sampling: Option<f64>,
    #[config(default = 0.0)]
    pub dropout:            f64,
    #[config(default = false)]
    pub noisy:              bool,
}

impl Seq2SeqConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2SeqModel<B> {
        let encoders: Vec<SentenceEncoder<B>> = self
            .source_vocab_sizes
            .iter()
            .map(|&vocab_size| {
                SentenceEncoderConfig::new(vocab_size, self.embedding_size, self.encoder_rnn_size)
                    .with_dropout(self.dropout)
                    .with_noisy(self.noisy)
                    .init(device)
            })
            .collect();

        let encoder_sizes   = vec![self.encoder_rnn_size; encoders.len()];
        let attention_sizes = if self.use_attention { encoder_sizes.clone() } else { Vec::new() };
        let copy_source     = self.copy_from.filter(|&i| i < encoders.len());
        if self.copy_from.is_some() && copy_source.is_none() {
            tracing::warn!("Copy source {:?} does not name an encoder, copying disabled.", self.copy_from);
        }

        let decoder = DecoderConfig::new(
            self.target_vocab_size,
            self.embedding_size,
            self.rnn_size,
            self.max_output_len,
            encoder_sizes,
            attention_sizes,
        )
        .with_attention_dim(self.attention_dim)
        .with_copy_features(copy_source.map(|_| self.encoder_rnn_size))
        .with_scheduled_sampling(self.scheduled_sampling)
        .with_dropout(self.dropout)
        .with_noisy_activations(self.noisy)
        .init(device);

        Seq2SeqModel {
            encoders,
            decoder,
            copy_source: copy_source.unwrap_or(usize::MAX),
        }
    }
}

#[derive(Module, Debug)]
pub struct Seq2SeqModel<B: Backend> {
    pub encoders:    Vec<SentenceEncoder<B>>,
    pub decoder:     Decoder<B>,
    /// Index of the copied encoder, usize::MAX when copying is off
    pub copy_source: usize,
}

impl<B: Backend> Seq2SeqModel<B> {
    pub fn forward(&self, batch: &Seq2SeqBatch<B>, global_step: usize) -> DecoderOutput<B> {
        let mut encoded          = Vec::with_capacity(self.encoders.len());
        let mut attention_states = Vec::with_capacity(self.encoders.len());

        for (encoder, source) in self.encoders.iter().zip(&batch.sources) {
            let out = encoder.forward(source.ids.clone(), source.mask.clone());
            encoded.push(out.encoded);
            attention_states.push(out.states);
        }

        let copy_source = match (attention_states.get(self.copy_source), &batch.copy_indices) {
            (Some(states), Some(indices)) => Some(CopySource {
                indices: indices.clone(),
                states:  states.clone(),
            }),
            _ => None,
        };

        self.decoder.forward(DecoderInput {
            encoded,
            attention_states,
            copy_source,
            target_ids:     batch.target_ids.clone(),
            target_weights: batch.target_weights.clone(),
            global_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::{backend::NdArray, data::dataloader::batcher::Batcher};

    use crate::data::batcher::{BatchLayout, Seq2SeqBatcher};
    use crate::data::dataset::Seq2SeqSample;
    use crate::domain::vocabulary::Vocabulary;

    type B = NdArray;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn layout(series: usize, copy_from: Option<usize>) -> Arc<BatchLayout> {
        let vocab = Vocabulary::from_sentences(&[words("a b c d"), words("e f")], 20);
        Arc::new(BatchLayout {
            source_vocabs:  vec![vocab.clone(); series],
            target_vocab:   vocab,
            max_input_len:  6,
            max_output_len: 4,
            copy_from,
        })
    }

    fn samples(series: usize) -> Vec<Seq2SeqSample> {
        vec![
            Seq2SeqSample {
                sources: vec![words("a b c"); series],
                target:  Some(words("b c")),
            },
            Seq2SeqSample {
                sources: vec![words("d zz"); series],
                target:  Some(words("zz e f")),
            },
        ]
    }

    fn config(layout: &BatchLayout, copy_from: Option<usize>) -> Seq2SeqConfig {
        Seq2SeqConfig::new(
            layout.source_vocabs.iter().map(Vocabulary::len).collect(),
            layout.target_vocab.len(),
            5,
            6,
            6,
            layout.max_output_len,
        )
        .with_attention_dim(4)
        .with_copy_from(copy_from)
    }

    #[test]
    fn test_forward_for_several_encoder_counts() {
        let device = Default::default();
        for series in [0, 1, 2] {
            let layout  = layout(series, None);
            let model   = config(&layout, None).init::<B>(&device);
            let batcher = Seq2SeqBatcher::<B>::new(layout.clone(), device);
            let batch   = batcher.batch(samples(series));

            assert_eq!(model.encoders.len(), series);
            let out = model.forward(&batch, 0);
            assert_eq!(out.hidden_states.len(), layout.max_output_len + 1);
            assert_eq!(out.decoded.dims(), [2, layout.max_output_len + 1]);
        }
    }

    #[test]
    fn test_copy_from_encoder() {
        let device  = Default::default();
        let layout  = layout(2, Some(1));
        let model   = config(&layout, Some(1)).init::<B>(&device);
        assert_eq!(model.copy_source, 1);
        assert!(model.decoder.copy_projection.is_some());

        let batcher = Seq2SeqBatcher::<B>::new(layout.clone(), device);
        let out     = model.forward(&batcher.batch(samples(2)), 3);
        assert_eq!(out.decoded_log_probs.dims(), [2, layout.max_output_len + 1]);
    }

    #[test]
    fn test_copy_from_missing_encoder_is_disabled() {
        let device = Default::default();
        let layout = layout(1, None);
        let model  = config(&layout, Some(3)).init::<B>(&device);
        assert!(model.decoder.copy_projection.is_none());
        assert_eq!(model.copy_source, usize::MAX);
    }
}
