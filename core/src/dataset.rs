use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Labelled points scattered around random class centres.
#[derive(Debug, Clone, PartialEq)]
pub struct Clusters {
    pub centers: Vec<Vec<f64>>,
    pub inputs: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
}

impl Clusters {
    /// Centres are uniform in `[-1, 1)` per feature; points add uniform noise of
    /// half-width `|spread|`; a non-finite spread adds none. Every coordinate is
    /// snapped to `2^-10`.
    pub fn generate(classes: usize, features: usize, samples: usize, spread: f64, seed: u64) -> Self {
        let spread = if spread.is_finite() { spread.abs() } else { 0.0 };
        let mut rng = StdRng::seed_from_u64(seed);

        let centers: Vec<Vec<f64>> = (0..classes)
            .map(|_| (0..features).map(|_| snap(rng.gen_range(-1.0..1.0))).collect())
            .collect();

        let mut inputs = Vec::with_capacity(samples);
        let mut labels = Vec::with_capacity(samples);
        for _ in 0..samples {
            let label = rng.gen_range(0..classes.max(1));
            let point = centers
                .get(label)
                .map(|center| {
                    center
                        .iter()
                        .map(|c| snap(c + rng.gen_range(-spread..=spread)))
                        .collect()
                })
                .unwrap_or_default();
            inputs.push(point);
            labels.push(label);
        }

        Self {
            centers,
            inputs,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Uniform rows in `[0, 1)`, snapped to `2^-10` so `fixed<16,6>` holds them exactly.
pub fn uniform_rows(rows: usize, features: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows)
        .map(|_| (0..features).map(|_| snap(rng.gen::<f64>())).collect())
        .collect()
}

fn snap(x: f64) -> f64 {
    (x * 1024.0).round() / 1024.0
}
