// ============================================================
// Layer 5 - Encoder Output Fusion
// ============================================================
// Turns the final states of zero or more encoders into the one
// vector per example that seeds the decoder state.
//
//   no encoder                      → zeros [batch, rnn_size]
//                                     (language model mode)
//   one encoder of width rnn_size   → passed through unchanged
//   anything else                   → concat, dropout, affine
//                                     projection to rnn_size
//
// Only the last case owns parameters.

use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    prelude::*,
};

#[derive(Config, Debug)]
pub struct EncoderFusionConfig {
    /// Output width of each encoder, in the order they are passed in
    pub encoder_sizes: Vec<usize>,
    pub rnn_size:      usize,
    #[config(default = 0.0)]
    pub dropout:       f64,
}

impl EncoderFusionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderFusion<B> {
        let passthrough = self.encoder_sizes.len() == 1 && self.encoder_sizes[0] == self.rnn_size;

        let projection = if self.encoder_sizes.is_empty() {
            tracing::info!("No encoder - language model only.");
            None
        } else if passthrough {
            tracing::info!("Using encoder output without projection.");
            None
        } else {
            let concat_size: usize = self.encoder_sizes.iter().sum();
            Some(
                LinearConfig::new(concat_size, self.rnn_size)
                    .with_initializer(Initializer::XavierNormal { gain: 1.0 })
                    .init(device),
            )
        };

        EncoderFusion {
            projection,
            dropout:  DropoutConfig::new(self.dropout).init(),
            rnn_size: self.rnn_size,
        }
    }
}

#[derive(Module, Debug)]
pub struct EncoderFusion<B: Backend> {
    pub projection: Option<Linear<B>>,
    pub dropout:    Dropout,
    pub rnn_size:   usize,
}

impl<B: Backend> EncoderFusion<B> {
    /// encoded: one [batch, width_i] tensor per encoder → [batch, rnn_size]
    pub fn forward(
        &self,
        encoded:    Vec<Tensor<B, 2>>,
        batch_size: usize,
        device:     &B::Device,
    ) -> Tensor<B, 2> {
        match &self.projection {
            Some(projection) => {
                let concat = Tensor::cat(encoded, 1);
                projection.forward(self.dropout.forward(concat))
            }
            None => match encoded.into_iter().next() {
                Some(single) => single,
                None         => Tensor::zeros([batch_size, self.rnn_size], device),
            },
        }
    }
}
