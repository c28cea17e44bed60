// ============================================================
// Layer 4 - Held-out Splitter
// ============================================================
// When no validation corpus is configured, a fraction of the
// training samples is held out for validation instead.
//
// The shuffle is seeded so that repeated runs with the same
// seed validate on the same sentences.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` and split into (train, held_out).
/// `train_fraction` is the share kept for training, e.g. 0.9.
pub fn split_held_out<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction.clamp(0.0, 1.0)).round() as usize;
    let held_out = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Held-out split: {} training, {} validation",
        samples.len(),
        held_out.len(),
    );

    (samples, held_out)
}
