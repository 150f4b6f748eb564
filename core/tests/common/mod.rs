#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform values in `[-limit, limit)`, the way `lecun_uniform` and friends initialise.
pub fn uniform_weights(n: usize, limit: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-limit..limit)).collect()
}

/// XNOR outputs come back as `{0, 1}`; the float simulation reports `{-1, +1}`.
pub fn decode_xnor(rows: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    rows.into_iter()
        .map(|row| row.into_iter().map(|v| if v == 0.0 { -1.0 } else { v }).collect())
        .collect()
}

/// Asserts that two floating point values are within epsilon of each other
pub fn assert_approx_eq(a: f64, b: f64, epsilon: f64, description: &str) {
    assert!(
        (a - b).abs() <= epsilon,
        "{} differ by more than epsilon: |{} - {}| = {} > {}",
        description,
        a,
        b,
        (a - b).abs(),
        epsilon
    );
}
