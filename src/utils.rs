use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

use crate::Float;

// Logistic activation: s -> 1/(1+e^(-s)), output between 0 and 1.
pub fn sigmoid(s: Float) -> Float {
    1.0 / (1.0 + (-s).exp())
}

/// Stochastic unit: fires when the uniform draw does not exceed the
/// activation probability.
pub fn bernoulli(prob: Float, draw: Float) -> Float {
    if draw <= prob {
        1.0
    } else {
        0.0
    }
}

/// Overwrites `values` with independent N(0, 1) draws from a generator
/// seeded by `seed`. The same seed always yields the same values.
pub fn fill_standard_normal(values: &mut [Float], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for value in values.iter_mut() {
        *value = StandardNormal.sample(&mut rng);
    }
}

pub fn mean_squared_error(a: &[Float], b: &[Float]) -> Float {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let sum: Float = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    sum / a.len() as Float
}
