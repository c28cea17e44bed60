// ============================================================
// Layer 4 - Seq2Seq Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<Seq2SeqSample>
// into tensors for one forward pass.
//
// Shapes (b = batch size, T = max_output_len):
//
//   sources[i].ids     [b, S_i]    source ids + </s>, padded with <pad>
//   sources[i].mask    [b, S_i]    1.0 for real positions, 0.0 for padding
//   copy_indices       [b, S_c]    copy source tokens in TARGET vocabulary
//                                  ids, -1 where a token has no slot
//   target_ids         [b, T + 2]  <s> w1 .. wn </s> <pad> ..
//   target_weights     [b, T + 1]  loss weight of each target position
//
// Source lengths are padded to the longest sentence in the
// batch; targets always have the fixed length T + 2 because
// the decoder unrolls a fixed number of steps.
//
// Samples without a target (test data) get an all-<pad> target
// with zero weights, so the loss of such a batch is zero.

use std::sync::Arc;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::Seq2SeqSample;
use crate::domain::vocabulary::{Vocabulary, BOS_ID, EOS_ID, PAD_ID};

/// Copy index for positions that map to no target vocabulary slot
pub const NO_COPY_SLOT: i64 = -1;

#[derive(Debug, Clone)]
pub struct SourceBatch<B: Backend> {
    pub ids:  Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2>,
}

#[derive(Debug, Clone)]
pub struct Seq2SeqBatch<B: Backend> {
    pub sources:        Vec<SourceBatch<B>>,
    pub copy_indices:   Option<Tensor<B, 2, Int>>,
    pub target_ids:     Tensor<B, 2, Int>,
    pub target_weights: Tensor<B, 2>,
}

impl<B: Backend> Seq2SeqBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.target_ids.dims()[0]
    }
}

/// Vocabularies and length limits shared by every batch.
#[derive(Debug)]
pub struct BatchLayout {
    pub source_vocabs:  Vec<Vocabulary>,
    pub target_vocab:   Vocabulary,
    pub max_input_len:  usize,
    pub max_output_len: usize,
    /// Index of the source series the decoder may copy from
    pub copy_from:      Option<usize>,
}

// ─── Seq2SeqBatcher ───────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct Seq2SeqBatcher<B: Backend> {
    pub device: B::Device,
    layout:     Arc<BatchLayout>,
}

impl<B: Backend> Seq2SeqBatcher<B> {
    pub fn new(layout: Arc<BatchLayout>, device: B::Device) -> Self {
        Self { device, layout }
    }

    pub fn layout(&self) -> &BatchLayout {
        &self.layout
    }

    fn int_matrix(&self, rows: Vec<Vec<i64>>, pad: i64) -> Tensor<B, 2, Int> {
        let batch_size = rows.len();
        let width      = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let flat: Vec<i64> = rows
            .into_iter()
            .flat_map(|mut r| {
                r.resize(width, pad);
                r
            })
            .collect();
        Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [batch_size, width]), &self.device)
    }

    fn float_matrix(&self, rows: Vec<Vec<f32>>) -> Tensor<B, 2> {
        let batch_size = rows.len();
        let width      = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let flat: Vec<f32> = rows
            .into_iter()
            .flat_map(|mut r| {
                r.resize(width, 0.0);
                r
            })
            .collect();
        Tensor::<B, 2>::from_data(TensorData::new(flat, [batch_size, width]), &self.device)
    }

    fn source_batch(&self, items: &[Seq2SeqSample], series: usize) -> SourceBatch<B> {
        let vocab = &self.layout.source_vocabs[series];
        let rows: Vec<Vec<i64>> = items
            .iter()
            .map(|s| {
                s.sources
                    .get(series)
                    .map(|sent| vocab.encode_source(sent, self.layout.max_input_len))
                    .unwrap_or_else(|| vec![EOS_ID as i64])
            })
            .collect();
        let masks: Vec<Vec<f32>> = rows.iter().map(|r| vec![1.0; r.len()]).collect();

        SourceBatch {
            ids:  self.int_matrix(rows, PAD_ID as i64),
            mask: self.float_matrix(masks),
        }
    }

    /// Positions of the copy source sentence expressed as target
    /// vocabulary ids. The trailing </s> and the padding never copy.
    fn copy_batch(&self, items: &[Seq2SeqSample], series: usize) -> Tensor<B, 2, Int> {
        let target_vocab = &self.layout.target_vocab;
        let rows: Vec<Vec<i64>> = items
            .iter()
            .map(|s| {
                let sentence = s.sources.get(series).map(Vec::as_slice).unwrap_or(&[]);
                sentence
                    .iter()
                    .take(self.layout.max_input_len)
                    .map(|t| target_vocab.lookup(t).map(|id| id as i64).unwrap_or(NO_COPY_SLOT))
                    .chain(std::iter::once(NO_COPY_SLOT))
                    .collect()
            })
            .collect();
        self.int_matrix(rows, NO_COPY_SLOT)
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<Seq2SeqSample, Seq2SeqBatch<B>> for Seq2SeqBatcher<B> {
    fn batch(&self, items: Vec<Seq2SeqSample>) -> Seq2SeqBatch<B> {
        let layout = &self.layout;

        let sources = (0..layout.source_vocabs.len())
            .map(|i| self.source_batch(&items, i))
            .collect();

        let copy_indices = layout.copy_from.map(|i| self.copy_batch(&items, i));

        let (target_rows, weight_rows): (Vec<Vec<i64>>, Vec<Vec<f32>>) = items
            .iter()
            .map(|s| match &s.target {
                Some(sentence) => {
                    let enc = layout.target_vocab.encode_target(sentence, layout.max_output_len);
                    (enc.ids, enc.weights)
                }
                None => {
                    let mut ids = vec![PAD_ID as i64; layout.max_output_len + 2];
                    ids[0] = BOS_ID as i64;
                    (ids, vec![0.0; layout.max_output_len + 1])
                }
            })
            .unzip();

        Seq2SeqBatch {
            sources,
            copy_indices,
            target_ids:     self.int_matrix(target_rows, PAD_ID as i64),
            target_weights: self.float_matrix(weight_rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn s(text: &str) -> Vec<String> {
        text.split(' ').map(str::to_string).collect()
    }

    fn batcher(copy_from: Option<usize>) -> Seq2SeqBatcher<B> {
        let layout = BatchLayout {
            source_vocabs:  vec![Vocabulary::from_tokens(["a", "b", "c"])],
            target_vocab:   Vocabulary::from_tokens(["x", "a"]),
            max_input_len:  5,
            max_output_len: 3,
            copy_from,
        };
        Seq2SeqBatcher::new(Arc::new(layout), Default::default())
    }

    fn samples() -> Vec<Seq2SeqSample> {
        vec![
            Seq2SeqSample { sources: vec![s("a b c")], target: Some(s("x")) },
            Seq2SeqSample { sources: vec![s("b")],     target: Some(s("x a x x x")) },
        ]
    }

    #[test]
    fn test_shapes() {
        let batch = batcher(None).batch(samples());
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.sources[0].ids.dims(), [2, 4]);
        assert_eq!(batch.sources[0].mask.dims(), [2, 4]);
        assert_eq!(batch.target_ids.dims(), [2, 5]);
        assert_eq!(batch.target_weights.dims(), [2, 4]);
        assert!(batch.copy_indices.is_none());
    }

    #[test]
    fn test_source_padding_and_mask() {
        let batch = batcher(None).batch(samples());
        let ids: Vec<i64> = batch.sources[0].ids.clone().into_data().iter::<i64>().collect();
        assert_eq!(ids, vec![4, 5, 6, 2, 5, 2, 0, 0]);
        let mask: Vec<f32> = batch.sources[0].mask.clone().into_data().iter::<f32>().collect();
        assert_eq!(mask, vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_target_weights() {
        let batch = batcher(None).batch(samples());
        let w: Vec<f32> = batch.target_weights.into_data().iter::<f32>().collect();
        assert_eq!(w, vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_copy_indices_use_target_vocabulary() {
        let batch = batcher(Some(0)).batch(samples());
        let copy: Vec<i64> = batch.copy_indices.unwrap().into_data().iter::<i64>().collect();
        // "a" exists in the target vocabulary as id 5, "b"/"c" do not
        assert_eq!(copy, vec![5, -1, -1, -1, -1, -1, -1, -1]);
    }

    #[test]
    fn test_missing_target_has_zero_weights() {
        let items = vec![Seq2SeqSample { sources: vec![s("a")], target: None }];
        let batch = batcher(None).batch(items);
        let w: Vec<f32> = batch.target_weights.into_data().iter::<f32>().collect();
        assert!(w.iter().all(|&x| x == 0.0));
    }
}
