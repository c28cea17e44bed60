// ============================================================
// Layer 5 - Decoder Attention
// ============================================================
// Additive attention over one or more per-position encoder
// state tensors, driven step by step from the decoder loop.
//
// One head per attended tensor [batch, len, dim_i]:
//
//   keys_i   = K_i · states_i                 (once per sequence)
//   e_i      = v_i · tanh(keys_i + Q_i · s)   s = cell state
//   α_i      = softmax(e_i) over positions
//   ctx_i    = Σ_t α_i[t] · states_i[t]
//
// The contexts of all heads are concatenated. Each decoder step
// then runs
//
//   x   = input_mix([input ‖ ctx_prev])
//   s   = cell(x, s)
//   ctx = attend(s)
//   out = output_mix([s ‖ ctx])
//
// with a zero context before the first step. The same module is
// used by the teacher-forcing and self-feeding passes.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::activation,
};

#[derive(Config, Debug)]
pub struct AttentionConfig {
    /// Feature width of each attended tensor
    pub state_sizes:    Vec<usize>,
    /// Decoder cell state width (the query)
    pub query_size:     usize,
    /// Width of the cell input (embedding size)
    pub input_size:     usize,
    #[config(default = 64)]
    pub attention_dim:  usize,
}

impl AttentionConfig {
    pub fn context_size(&self) -> usize {
        self.state_sizes.iter().sum()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Attention<B> {
        let heads = self
            .state_sizes
            .iter()
            .map(|&dim| AttentionHead {
                key_projection:   LinearConfig::new(dim, self.attention_dim).with_bias(false).init(device),
                query_projection: LinearConfig::new(self.query_size, self.attention_dim).init(device),
                energy:           LinearConfig::new(self.attention_dim, 1).with_bias(false).init(device),
            })
            .collect();

        let ctx = self.context_size();
        Attention {
            heads,
            input_mix:    LinearConfig::new(self.input_size + ctx, self.input_size).init(device),
            output_mix:   LinearConfig::new(self.query_size + ctx, self.query_size).init(device),
            context_size: ctx,
        }
    }
}

#[derive(Module, Debug)]
pub struct AttentionHead<B: Backend> {
    pub key_projection:   Linear<B>,
    pub query_projection: Linear<B>,
    pub energy:           Linear<B>,
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub heads:        Vec<AttentionHead<B>>,
    pub input_mix:    Linear<B>,
    pub output_mix:   Linear<B>,
    pub context_size: usize,
}

/// Attended tensors with their keys already projected.
#[derive(Debug, Clone)]
pub struct AttendedStates<B: Backend> {
    keys:   Vec<Tensor<B, 3>>,
    values: Vec<Tensor<B, 3>>,
}

impl<B: Backend> AttentionHead<B> {
    /// Attention weights [batch, len] for one query [batch, query]
    fn weights(&self, keys: Tensor<B, 3>, query: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch_size, len, dim] = keys.dims();
        let q = self
            .query_projection
            .forward(query)
            .unsqueeze_dim::<3>(1)
            .expand([batch_size, len, dim]);
        let energies = self
            .energy
            .forward(activation::tanh(keys + q))
            .reshape([batch_size, len]);
        activation::softmax(energies, 1)
    }
}

impl<B: Backend> Attention<B> {
    /// Project the keys once for the whole decoding.
    pub fn prepare(&self, states: Vec<Tensor<B, 3>>) -> AttendedStates<B> {
        let keys = self
            .heads
            .iter()
            .zip(&states)
            .map(|(head, s)| head.key_projection.forward(s.clone()))
            .collect();
        AttendedStates { keys, values: states }
    }

    pub fn initial_context(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.context_size], device)
    }

    /// Concatenated context vectors [batch, context_size] for `query`.
    pub fn context(&self, attended: &AttendedStates<B>, query: Tensor<B, 2>) -> Tensor<B, 2> {
        let contexts: Vec<Tensor<B, 2>> = self
            .heads
            .iter()
            .zip(attended.keys.iter().zip(&attended.values))
            .map(|(head, (keys, values))| {
                let [batch_size, len, dim] = values.dims();
                let alpha = head
                    .weights(keys.clone(), query.clone())
                    .unsqueeze_dim::<3>(2)
                    .expand([batch_size, len, dim]);
                (alpha * values.clone()).sum_dim(1).reshape([batch_size, dim])
            })
            .collect();
        Tensor::cat(contexts, 1)
    }

    pub fn mix_input(&self, input: Tensor<B, 2>, context: Tensor<B, 2>) -> Tensor<B, 2> {
        self.input_mix.forward(Tensor::cat(vec![input, context], 1))
    }

    pub fn mix_output(&self, cell_output: Tensor<B, 2>, context: Tensor<B, 2>) -> Tensor<B, 2> {
        self.output_mix.forward(Tensor::cat(vec![cell_output, context], 1))
    }
}
