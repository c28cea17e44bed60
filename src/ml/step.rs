// ============================================================
// Layer 5 - Step Functions
// ============================================================
// A step function decides what the decoder is fed at step i > 0
// given the output of step i - 1. Step 0 always gets <s>.
//
//   Predict(Greedy)         arg-max of the generation logits
//   Predict(CopyAugmented)  arg-max of generation logits merged
//                           with copy scores from source positions
//   ScheduledSampling       per example, ground truth with
//                           probability k / (k + exp(step / k)),
//                           otherwise the fallback prediction
//
// The variant is picked once from the decoder configuration.
// The tensor helpers below are the pieces the decoder combines;
// they hold no parameters of their own.

use burn::{prelude::*, tensor::Distribution};

/// How the decoder turns its previous output into a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Greedy,
    CopyAugmented,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepFunction {
    Predict(Prediction),
    ScheduledSampling { decay: f64, fallback: Prediction },
}

/// Score given to vocabulary slots no source position maps to.
/// exp() of it underflows to exactly zero next to any real logit.
pub const NO_COPY_SCORE: f64 = -1.0e9;

/// Inverse sigmoid decay `k / (k + exp(global_step / k))`.
///
/// Starts at k / (k + 1) and decreases monotonically towards 0 as
/// `global_step` grows.
pub fn sampling_threshold(decay: f64, global_step: usize) -> f64 {
    decay / (decay + (global_step as f64 / decay).exp())
}

/// Element-wise log(Σ_i exp(m_i)) over same-shaped [batch, vocab]
/// matrices, computed relative to the element-wise maximum.
pub fn log_sum_exp<B: Backend>(matrices: Vec<Tensor<B, 2>>) -> Tensor<B, 2> {
    let count = matrices.len();
    let [batch_size, vocab_size] = matrices[0].dims();
    let shape = [batch_size, vocab_size, count];

    let stacked: Tensor<B, 3> = Tensor::stack(matrices, 2);
    let maxima = stacked.clone().max_dim(2);
    let summed = (stacked - maxima.clone().expand(shape)).exp().sum_dim(2).log();
    (maxima + summed).reshape([batch_size, vocab_size])
}

/// Place one score per example at that example's vocabulary index.
/// All other slots get `NO_COPY_SCORE`; an index outside
/// `0..vocab_size` places nothing.
///
/// scores: [batch], indices: [batch] → [batch, vocab_size]
pub fn scatter_to_vocabulary<B: Backend>(
    scores:     Tensor<B, 1>,
    indices:    Tensor<B, 1, Int>,
    vocab_size: usize,
) -> Tensor<B, 2> {
    let device = scores.device();
    let [batch_size] = scores.dims();
    let shape = [batch_size, vocab_size];

    let slots = Tensor::<B, 1, Int>::arange(0..vocab_size as i64, &device)
        .reshape([1, vocab_size])
        .expand(shape);
    let hit = slots.equal(indices.reshape([batch_size, 1]).expand(shape));

    Tensor::full(shape, NO_COPY_SCORE, &device)
        .mask_where(hit, scores.reshape([batch_size, 1]).expand(shape))
}

/// Generation logits merged with copy scores.
///
/// For source position j the copy score is `<projected_j, state>`; it
/// is scattered to the vocabulary slot of that position's token and
/// all score vectors are combined with `log_sum_exp`, so a word that
/// can be both generated and copied adds up in probability space.
///
/// generate: [batch, vocab], state: [batch, rnn],
/// projected[j]: [batch, rnn], indices[j]: [batch]
pub fn copy_augmented_logits<B: Backend>(
    generate:  Tensor<B, 2>,
    state:     Tensor<B, 2>,
    projected: &[Tensor<B, 2>],
    indices:   &[Tensor<B, 1, Int>],
) -> Tensor<B, 2> {
    let [batch_size, vocab_size] = generate.dims();
    let mut all = Vec::with_capacity(projected.len() + 1);
    all.push(generate);

    for (source, slot) in projected.iter().zip(indices) {
        let score = (source.clone() * state.clone()).sum_dim(1).reshape([batch_size]);
        all.push(scatter_to_vocabulary(score, slot.clone(), vocab_size));
    }

    log_sum_exp(all)
}

/// Per-example choice between two [batch, dim] inputs:
/// rows where `take_first` is 1 come from `first`, others from `second`.
pub fn blend_rows<B: Backend>(
    first:      Tensor<B, 2>,
    second:     Tensor<B, 2>,
    take_first: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let shape = first.dims();
    let mask  = take_first.expand(shape);
    let other = mask.clone().mul_scalar(-1.0).add_scalar(1.0);
    first * mask + second * other
}

/// Scheduled sampling mix: each example independently draws
/// u ~ U[0, 1) and keeps the ground truth when u ≤ threshold.
pub fn scheduled_mix<B: Backend>(
    ground_truth: Tensor<B, 2>,
    predicted:    Tensor<B, 2>,
    threshold:    f64,
) -> Tensor<B, 2> {
    let [batch_size, _] = ground_truth.dims();
    let draw = Tensor::<B, 2>::random(
        [batch_size, 1],
        Distribution::Uniform(0.0, 1.0),
        &ground_truth.device(),
    );
    let take_truth = draw.lower_equal_elem(threshold).float();
    blend_rows(ground_truth, predicted, take_truth)
}
