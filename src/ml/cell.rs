// ============================================================
// Layer 5 - Recurrent Cell
// ============================================================
// A single GRU step, used by both the sentence encoders and the
// decoder:
//
//   r  = σ(W_ir x + W_hr h)
//   z  = σ(W_iz x + W_hz h)
//   n  = tanh(W_in x + r ⊙ (W_hn h))
//   h' = (1 - z) ⊙ n + z ⊙ h
//
// With noisy activations (Gulcehre et al., 2016) σ and tanh are
// replaced by their hard, piecewise-linear versions. On autodiff
// backends Gaussian noise is added whose scale grows with how far
// the unit is saturated:
//
//   Δ   = hard(x) - linear(x)
//   std = c · (σ(Δ) - 0.5)²
//   out = hard(x) + std · ε,   ε ~ N(0, 1)
//
// Evaluation (non-autodiff backends) uses hard(x) alone.

use burn::{
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::{activation, Distribution},
};

#[derive(Config, Debug)]
pub struct GruCellConfig {
    pub input_size:  usize,
    pub hidden_size: usize,
    #[config(default = false)]
    pub noisy:       bool,
    /// Noise scale `c` of the noisy activations
    #[config(default = 1.0)]
    pub noise_scale: f64,
}

impl GruCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GruCell<B> {
        let init = Initializer::Uniform { min: -0.1, max: 0.1 };
        GruCell {
            input_gates:  LinearConfig::new(self.input_size, 3 * self.hidden_size)
                .with_initializer(init.clone())
                .init(device),
            hidden_gates: LinearConfig::new(self.hidden_size, 3 * self.hidden_size)
                .with_initializer(init)
                .init(device),
            hidden_size:  self.hidden_size,
            noisy:        self.noisy,
            noise_scale:  self.noise_scale,
        }
    }
}

#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    pub input_gates:  Linear<B>,
    pub hidden_gates: Linear<B>,
    pub hidden_size:  usize,
    pub noisy:        bool,
    pub noise_scale:  f64,
}

fn gate<B: Backend>(x: &Tensor<B, 2>, index: usize, size: usize) -> Tensor<B, 2> {
    let [batch_size, _] = x.dims();
    x.clone().slice([0..batch_size, index * size..(index + 1) * size])
}

impl<B: Backend> GruCell<B> {
    /// input: [batch, input_size], state: [batch, hidden] → [batch, hidden]
    pub fn forward(&self, input: Tensor<B, 2>, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let h  = self.hidden_size;
        let gi = self.input_gates.forward(input);
        let gh = self.hidden_gates.forward(state.clone());

        let r = self.sigmoid(gate(&gi, 0, h) + gate(&gh, 0, h));
        let z = self.sigmoid(gate(&gi, 1, h) + gate(&gh, 1, h));
        let n = self.tanh(gate(&gi, 2, h) + r * gate(&gh, 2, h));

        let keep = z.clone().mul_scalar(-1.0).add_scalar(1.0);
        keep * n + z * state
    }

    fn sigmoid(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if !self.noisy {
            return activation::sigmoid(x);
        }
        let linear = x.mul_scalar(0.25).add_scalar(0.5);
        let hard   = linear.clone().clamp(0.0, 1.0);
        self.add_saturation_noise(hard, linear)
    }

    fn tanh(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if !self.noisy {
            return activation::tanh(x);
        }
        let hard = x.clone().clamp(-1.0, 1.0);
        self.add_saturation_noise(hard, x)
    }

    fn add_saturation_noise(&self, hard: Tensor<B, 2>, linear: Tensor<B, 2>) -> Tensor<B, 2> {
        if !B::ad_enabled() {
            return hard;
        }
        let delta = hard.clone() - linear;
        let std   = activation::sigmoid(delta)
            .sub_scalar(0.5)
            .powf_scalar(2.0)
            .mul_scalar(self.noise_scale);
        let eps = Tensor::random(hard.shape(), Distribution::Normal(0.0, 1.0), &hard.device());
        hard + std * eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let cell   = GruCellConfig::new(3, 5).init::<B>(&device);
        let out    = cell.forward(Tensor::ones([2, 3], &device), Tensor::zeros([2, 5], &device));
        assert_eq!(out.dims(), [2, 5]);
    }

    #[test]
    fn test_noisy_cell_is_bounded_without_autodiff() {
        let device = Default::default();
        let cell   = GruCellConfig::new(3, 4).with_noisy(true).init::<B>(&device);
        let state  = Tensor::<B, 2>::zeros([2, 4], &device);
        let out    = cell.forward(Tensor::ones([2, 3], &device).mul_scalar(100.0), state);

        // h' is a convex mix of n ∈ [-1, 1] and h = 0
        let values: Vec<f32> = out.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|v| v.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn test_noisy_cell_is_deterministic_without_autodiff() {
        let device = Default::default();
        let cell   = GruCellConfig::new(2, 2).with_noisy(true).init::<B>(&device);
        let x      = Tensor::<B, 2>::ones([1, 2], &device);
        let h      = Tensor::<B, 2>::zeros([1, 2], &device);
        let a: Vec<f32> = cell.forward(x.clone(), h.clone()).into_data().iter::<f32>().collect();
        let b: Vec<f32> = cell.forward(x, h).into_data().iter::<f32>().collect();
        assert_eq!(a, b);
    }
}
