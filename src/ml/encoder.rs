use burn::{
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer},
    prelude::*,
};

use crate::ml::cell::{GruCell, GruCellConfig};

#[derive(Config, Debug)]
pub struct SentenceEncoderConfig {
    pub vocab_size:     usize,
    pub embedding_size: usize,
    pub rnn_size:       usize,
    #[config(default = 0.0)]
    pub dropout:        f64,
    #[config(default = false)]
    pub noisy:          bool,
}

impl SentenceEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SentenceEncoder<B> {
        SentenceEncoder {
            embedding: EmbeddingConfig::new(self.vocab_size, self.embedding_size)
                .with_initializer(Initializer::Uniform { min: -0.5, max: 0.5 })
                .init(device),
            cell:      GruCellConfig::new(self.embedding_size, self.rnn_size)
                .with_noisy(self.noisy)
                .init(device),
            dropout:   DropoutConfig::new(self.dropout).init(),
            rnn_size:  self.rnn_size,
        }
    }
}

/// Unidirectional GRU over the source sentence.
#[derive(Module, Debug)]
pub struct SentenceEncoder<B: Backend> {
    pub embedding: Embedding<B>,
    pub cell:      GruCell<B>,
    pub dropout:   Dropout,
    pub rnn_size:  usize,
}

pub struct EncoderOutput<B: Backend> {
    /// Final state of every sentence: [batch, rnn_size]
    pub encoded: Tensor<B, 2>,
    /// State after every position: [batch, len, rnn_size]
    pub states:  Tensor<B, 3>,
}

impl<B: Backend> SentenceEncoder<B> {
    /// ids: [batch, len], mask: [batch, len] (1 real, 0 padding)
    pub fn forward(&self, ids: Tensor<B, 2, Int>, mask: Tensor<B, 2>) -> EncoderOutput<B> {
        let [batch_size, len] = ids.dims();
        let embedded = self.dropout.forward(self.embedding.forward(ids));
        let [_, _, emb] = embedded.dims();

        let mut state  = Tensor::zeros([batch_size, self.rnn_size], &embedded.device());
        let mut states = Vec::with_capacity(len);

        for t in 0..len {
            let x = embedded
                .clone()
                .slice([0..batch_size, t..t + 1, 0..emb])
                .reshape([batch_size, emb]);
            let m = mask
                .clone()
                .slice([0..batch_size, t..t + 1])
                .expand([batch_size, self.rnn_size]);

            // Padded positions carry the previous state forward
            let next = self.cell.forward(x, state.clone());
            let keep = m.clone().mul_scalar(-1.0).add_scalar(1.0);
            state = next * m + state * keep;
            states.push(state.clone());
        }

        EncoderOutput {
            encoded: state,
            states:  Tensor::stack(states, 1),
        }
    }
}
