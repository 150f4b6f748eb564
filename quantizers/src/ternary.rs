use fixed::NumericType;

use crate::error::Result;
use crate::quantizer::Alpha;

pub const DEFAULT_THRESHOLD: f64 = 0.33;

/// Three-level quantizer selecting `{-1, 0, +1}`, scaled externally by alpha.
///
/// Values whose magnitude exceeds `threshold * alpha` keep their sign, the rest go to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ternary {
    pub alpha: Alpha,
    pub threshold: Option<f64>,
}

impl Ternary {
    pub fn new(alpha: Alpha, threshold: Option<f64>) -> Self {
        Self { alpha, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(DEFAULT_THRESHOLD)
    }

    pub fn numeric_type(&self) -> Result<NumericType> {
        Ok(NumericType::integer(2, true)?)
    }

    /// Code for `x` against the fixed alpha (auto alpha counts as 1 here).
    pub fn project(&self, x: f64) -> f64 {
        let alpha = match self.alpha {
            Alpha::Fixed(a) => a,
            Alpha::Auto => 1.0,
        };
        select(x, self.threshold() * alpha)
    }

    /// Codes and scale for one output channel of a weight tensor under `alpha='auto'`.
    ///
    /// The cut sits at `threshold` times the channel's peak magnitude and the scale is
    /// the mean magnitude of the entries that survive it.
    pub fn project_auto(&self, channel: &[f64]) -> (Vec<f64>, f64) {
        let peak = channel.iter().fold(0.0f64, |acc, &w| acc.max(w.abs()));
        let cut = self.threshold() * peak;

        let codes: Vec<f64> = channel.iter().map(|&w| select(w, cut)).collect();

        let kept: Vec<f64> = channel
            .iter()
            .filter(|w| w.abs() > cut)
            .map(|w| w.abs())
            .collect();
        let scale = if kept.is_empty() {
            1.0
        } else {
            kept.iter().sum::<f64>() / kept.len() as f64
        };

        (codes, scale)
    }
}

fn select(x: f64, cut: f64) -> f64 {
    if x > cut {
        1.0
    } else if x < -cut {
        -1.0
    } else {
        0.0
    }
}
