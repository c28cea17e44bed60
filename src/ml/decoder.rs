// ============================================================
// Layer 5 - Recurrent Decoder
// ============================================================
// Builds the decoder part of the training graph.
//
// The timestep sequence of a batch has T + 2 positions
// (<s>, up to T words, </s>, padding). The decoder is unrolled
// over the first T + 1 of them and predicts positions 1..=T+1,
// so every pass yields exactly T + 1 hidden states.
//
// Two passes share one parameter set (this module):
//
//   teacher-forcing pass  input at step i is the ground-truth
//                         embedding of position i, or the
//                         scheduled-sampling mix when a decay
//                         constant is configured
//   self-feeding pass     <s> at step 0, then the embedding of
//                         the token predicted at step i - 1
//
// Loss head: logits = W·h + b over the vocabulary, with dropout
// on h only for the teacher-forcing pass. The sequence loss is
// the batch mean of each sentence's weight-normalised
// cross-entropy. The training objective is
//
//   scheduled sampling:  loss(teacher-forcing)
//   otherwise:           0.5 · (loss(teacher-forcing) + loss(self-feeding))

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation,
};

use crate::ml::attention::{AttendedStates, Attention, AttentionConfig};
use crate::ml::cell::{GruCell, GruCellConfig};
use crate::ml::fusion::{EncoderFusion, EncoderFusionConfig};
use crate::ml::step::{
    copy_augmented_logits, sampling_threshold, scheduled_mix, Prediction, StepFunction,
};

#[derive(Config, Debug)]
pub struct DecoderConfig {
    pub vocab_size:         usize,
    pub embedding_size:     usize,
    pub rnn_size:           usize,
    pub max_output_len:     usize,
    /// Final-state width of each encoder (empty: language model)
    pub encoder_sizes:      Vec<usize>,
    /// Feature width of each attended encoder tensor (empty: no attention)
    pub attention_sizes:    Vec<usize>,
    #[config(default = 64)]
    pub attention_dim:      usize,
    /// Feature width of the copy source states, enables the copy mechanism
    pub copy_features:      Option<usize>,
    /// Decay constant k of scheduled sampling
    pub scheduled_sampling: Option<f64>,
    #[config(default = 0.0)]
    pub dropout:            f64,
    #[config(default = false)]
    pub noisy_activations:  bool,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        let uniform = Initializer::Uniform { min: -0.5, max: 0.5 };

        let embedding = EmbeddingConfig::new(self.vocab_size, self.embedding_size)
            .with_initializer(uniform.clone())
            .init(device);

        // Bias starts at -ln|V|, i.e. a uniform distribution over the vocabulary
        let mut output = LinearConfig::new(self.rnn_size, self.vocab_size)
            .with_initializer(uniform.clone())
            .init(device);
        output.bias = Some(Param::from_tensor(Tensor::full(
            [self.vocab_size],
            -(self.vocab_size as f64).ln(),
            device,
        )));

        let fusion = EncoderFusionConfig::new(self.encoder_sizes.clone(), self.rnn_size)
            .with_dropout(self.dropout)
            .init(device);

        let cell = GruCellConfig::new(self.embedding_size, self.rnn_size)
            .with_noisy(self.noisy_activations)
            .init(device);

        let attention = (!self.attention_sizes.is_empty()).then(|| {
            AttentionConfig::new(self.attention_sizes.clone(), self.rnn_size, self.embedding_size)
                .with_attention_dim(self.attention_dim)
                .init(device)
        });

        let copy_projection = self.copy_features.map(|features| {
            LinearConfig::new(features, self.rnn_size)
                .with_bias(false)
                .with_initializer(uniform.clone())
                .init(device)
        });

        Decoder {
            embedding,
            output,
            fusion,
            cell,
            attention,
            copy_projection,
            dropout:        DropoutConfig::new(self.dropout).init(),
            vocab_size:     self.vocab_size,
            max_output_len: self.max_output_len,
            sampling_decay: self.scheduled_sampling.unwrap_or(0.0),
        }
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub embedding:       Embedding<B>,
    pub output:          Linear<B>,
    pub fusion:          EncoderFusion<B>,
    pub cell:            GruCell<B>,
    pub attention:       Option<Attention<B>>,
    pub copy_projection: Option<Linear<B>>,
    pub dropout:         Dropout,
    pub vocab_size:      usize,
    pub max_output_len:  usize,
    /// 0 disables scheduled sampling
    pub sampling_decay:  f64,
}

/// Source positions the decoder can copy from.
#[derive(Debug, Clone)]
pub struct CopySource<B: Backend> {
    /// Target-vocabulary id of each position, -1 where there is none: [batch, len]
    pub indices: Tensor<B, 2, Int>,
    /// Encoder state of each position: [batch, len, features]
    pub states:  Tensor<B, 3>,
}

pub struct DecoderInput<B: Backend> {
    /// Final state of each encoder: [batch, width_i]
    pub encoded:          Vec<Tensor<B, 2>>,
    /// Per-position states of each attended encoder: [batch, len_i, width_i]
    pub attention_states: Vec<Tensor<B, 3>>,
    pub copy_source:      Option<CopySource<B>>,
    /// Timestep sequence: [batch, T + 2]
    pub target_ids:       Tensor<B, 2, Int>,
    /// Target weights: [batch, T + 1]
    pub target_weights:   Tensor<B, 2>,
    /// Optimizer updates applied so far
    pub global_step:      usize,
}

pub struct DecoderOutput<B: Backend> {
    /// Training objective
    pub cost:                  Tensor<B, 1>,
    pub loss_with_gt_ins:      Tensor<B, 1>,
    pub loss_with_decoded_ins: Tensor<B, 1>,
    /// Self-feeding arg-max tokens: [batch, T + 1]
    pub decoded:               Tensor<B, 2, Int>,
    /// Log-probability of each decoded token: [batch, T + 1]
    pub decoded_log_probs:     Tensor<B, 2>,
    /// Self-feeding logits: [batch, T + 1, vocab]
    pub decoded_logits:        Tensor<B, 3>,
    /// Self-feeding hidden states, T + 1 of them: [batch, rnn]
    pub hidden_states:         Vec<Tensor<B, 2>>,
}

struct PreparedCopy<B: Backend> {
    projected: Vec<Tensor<B, 2>>,
    indices:   Vec<Tensor<B, 1, Int>>,
}

struct StepContext<'a, B: Backend> {
    gt_inputs:   &'a [Tensor<B, 2>],
    copy:        Option<&'a PreparedCopy<B>>,
    global_step: usize,
}

struct HeadOutput<B: Backend> {
    loss:      Tensor<B, 1>,
    decoded:   Tensor<B, 2, Int>,
    log_probs: Tensor<B, 2>,
    logits:    Tensor<B, 3>,
}

impl<B: Backend> Decoder<B> {
    pub fn prediction(&self) -> Prediction {
        if self.copy_projection.is_some() {
            Prediction::CopyAugmented
        } else {
            Prediction::Greedy
        }
    }

    /// Step function of the teacher-forcing pass; None feeds ground truth
    pub fn teacher_forcing_step(&self) -> Option<StepFunction> {
        (self.sampling_decay > 0.0).then(|| StepFunction::ScheduledSampling {
            decay:    self.sampling_decay,
            fallback: self.prediction(),
        })
    }

    pub fn self_feeding_step(&self) -> StepFunction {
        StepFunction::Predict(self.prediction())
    }

    pub fn forward(&self, input: DecoderInput<B>) -> DecoderOutput<B> {
        let device = input.target_ids.device();
        let [batch_size, seq_len] = input.target_ids.dims();
        let steps = seq_len - 1;

        let encoded = self.fusion.forward(input.encoded, batch_size, &device);

        // ── Ground-truth inputs and targets ──────────────────────────────────
        let embedded = self.dropout.forward(
            self.embedding
                .forward(input.target_ids.clone().slice([0..batch_size, 0..steps])),
        );
        let [_, _, emb] = embedded.dims();
        let gt_inputs: Vec<Tensor<B, 2>> = (0..steps)
            .map(|i| {
                embedded
                    .clone()
                    .slice([0..batch_size, i..i + 1, 0..emb])
                    .reshape([batch_size, emb])
            })
            .collect();
        let targets = input.target_ids.slice([0..batch_size, 1..seq_len]);

        // ── Initial state and attention ──────────────────────────────────────
        let (initial_state, attended) = match &self.attention {
            Some(attention) => {
                let states = input
                    .attention_states
                    .into_iter()
                    .map(|s| self.dropout.forward(s))
                    .collect();
                (self.dropout.forward(encoded), Some(attention.prepare(states)))
            }
            None => (encoded, None),
        };

        let copy = input.copy_source.and_then(|c| self.prepare_copy(c));
        let ctx  = StepContext {
            gt_inputs:   &gt_inputs,
            copy:        copy.as_ref(),
            global_step: input.global_step,
        };

        // ── The two passes ───────────────────────────────────────────────────
        let gt_outputs = self.unroll(
            initial_state.clone(),
            attended.as_ref(),
            self.teacher_forcing_step(),
            &ctx,
        );
        let decoded_outputs = self.unroll(
            initial_state,
            attended.as_ref(),
            Some(self.self_feeding_step()),
            &ctx,
        );

        let gt_head = self.loss_and_decoded(
            &gt_outputs,
            targets.clone(),
            input.target_weights.clone(),
            true,
        );
        let dec_head = self.loss_and_decoded(&decoded_outputs, targets, input.target_weights, false);

        let cost = if self.sampling_decay > 0.0 {
            gt_head.loss.clone()
        } else {
            (gt_head.loss.clone() + dec_head.loss.clone()).mul_scalar(0.5)
        };

        DecoderOutput {
            cost,
            loss_with_gt_ins:      gt_head.loss,
            loss_with_decoded_ins: dec_head.loss,
            decoded:               dec_head.decoded,
            decoded_log_probs:     dec_head.log_probs,
            decoded_logits:        dec_head.logits,
            hidden_states:         decoded_outputs,
        }
    }

    fn prepare_copy(&self, source: CopySource<B>) -> Option<PreparedCopy<B>> {
        let projection = self.copy_projection.as_ref()?;
        let projected  = projection.forward(self.dropout.forward(source.states));
        let [batch_size, len, width] = projected.dims();

        let projected = (0..len)
            .map(|j| {
                projected
                    .clone()
                    .slice([0..batch_size, j..j + 1, 0..width])
                    .reshape([batch_size, width])
            })
            .collect();
        let indices = (0..len)
            .map(|j| {
                source
                    .indices
                    .clone()
                    .slice([0..batch_size, j..j + 1])
                    .reshape([batch_size])
            })
            .collect();

        Some(PreparedCopy { projected, indices })
    }

    /// Run the cell over `ctx.gt_inputs.len()` steps. Step 0 always gets the
    /// ground-truth <s>; later steps use `step` when given.
    fn unroll(
        &self,
        initial_state: Tensor<B, 2>,
        attended:      Option<&AttendedStates<B>>,
        step:          Option<StepFunction>,
        ctx:           &StepContext<B>,
    ) -> Vec<Tensor<B, 2>> {
        let [batch_size, _] = initial_state.dims();
        let device = initial_state.device();

        let mut state   = initial_state;
        let mut context = self
            .attention
            .as_ref()
            .map(|a| a.initial_context(batch_size, &device));
        let mut outputs: Vec<Tensor<B, 2>> = Vec::with_capacity(ctx.gt_inputs.len());

        for (i, ground_truth) in ctx.gt_inputs.iter().enumerate() {
            let input = match (step, outputs.last()) {
                (Some(step), Some(previous)) => self.feed_back(step, previous.clone(), i, ctx),
                _ => ground_truth.clone(),
            };

            let output = match (&self.attention, attended, context.take()) {
                (Some(attention), Some(attended), Some(previous_context)) => {
                    let x = attention.mix_input(input, previous_context);
                    state = self.cell.forward(x, state);
                    let current = attention.context(attended, state.clone());
                    let out = attention.mix_output(state.clone(), current.clone());
                    context = Some(current);
                    out
                }
                _ => {
                    state = self.cell.forward(input, state);
                    state.clone()
                }
            };
            outputs.push(output);
        }

        outputs
    }

    fn feed_back(
        &self,
        step:     StepFunction,
        previous: Tensor<B, 2>,
        i:        usize,
        ctx:      &StepContext<B>,
    ) -> Tensor<B, 2> {
        match step {
            StepFunction::Predict(prediction) => self.predicted_embedding(prediction, previous, ctx),
            StepFunction::ScheduledSampling { decay, fallback } => {
                let threshold = sampling_threshold(decay, ctx.global_step);
                let predicted = self.predicted_embedding(fallback, previous, ctx);
                scheduled_mix(ctx.gt_inputs[i].clone(), predicted, threshold)
            }
        }
    }

    /// Embedding of the arg-max token predicted from `previous`.
    fn predicted_embedding(
        &self,
        prediction: Prediction,
        previous:   Tensor<B, 2>,
        ctx:        &StepContext<B>,
    ) -> Tensor<B, 2> {
        let previous = self.dropout.forward(previous);
        let generate = self.output.forward(previous.clone());

        let logits = match (prediction, ctx.copy) {
            (Prediction::CopyAugmented, Some(copy)) => {
                copy_augmented_logits(generate, previous, &copy.projected, &copy.indices)
            }
            _ => generate,
        };

        let [batch_size, _] = logits.dims();
        let word = logits.argmax(1).reshape([batch_size]);
        self.dropout.forward(self.embed_tokens(word))
    }

    /// ids: [batch] → [batch, embedding_size]
    pub fn embed_tokens(&self, ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let [batch_size] = ids.dims();
        let embedded = self.embedding.forward(ids.reshape([batch_size, 1]));
        let [_, _, emb] = embedded.dims();
        embedded.reshape([batch_size, emb])
    }

    fn loss_and_decoded(
        &self,
        outputs:     &[Tensor<B, 2>],
        targets:     Tensor<B, 2, Int>,
        weights:     Tensor<B, 2>,
        use_dropout: bool,
    ) -> HeadOutput<B> {
        let hidden: Tensor<B, 3> = Tensor::stack(outputs.to_vec(), 1);
        let hidden = if use_dropout { self.dropout.forward(hidden) } else { hidden };

        let logits = self.output.forward(hidden);
        let [batch_size, steps, _] = logits.dims();
        let log_probs = activation::log_softmax(logits.clone(), 2);

        let decoded = logits.clone().argmax(2).reshape([batch_size, steps]);
        let decoded_log_probs = log_probs.clone().max_dim(2).reshape([batch_size, steps]);

        let target_log_probs = log_probs
            .gather(2, targets.reshape([batch_size, steps, 1]))
            .reshape([batch_size, steps]);

        // Cross-entropy averaged over the real positions of each sentence
        let per_sentence = (target_log_probs.neg() * weights.clone()).sum_dim(1)
            / weights.sum_dim(1).add_scalar(1e-12);

        HeadOutput {
            loss:      per_sentence.mean(),
            decoded,
            log_probs: decoded_log_probs,
            logits,
        }
    }
}
