use fixed::NumericType;

use crate::error::Result;
use crate::quantizer::Alpha;

/// Two-level quantizer. With `is_xnor` the levels are encoded as `{0, 1}`
/// (0 standing for -1), otherwise as `{-1, +1}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binary {
    pub is_xnor: bool,
    pub alpha: Alpha,
}

impl Binary {
    pub fn new(is_xnor: bool) -> Self {
        Self {
            is_xnor,
            alpha: Alpha::default(),
        }
    }

    pub fn numeric_type(&self) -> Result<NumericType> {
        if self.is_xnor {
            xnor_type()
        } else {
            // A 1-bit signed type only holds {-1, 0}, so +1 needs the second bit.
            Ok(NumericType::integer(2, true)?)
        }
    }

    pub fn project(&self, x: f64) -> f64 {
        select(x, self.is_xnor)
    }

    /// Per-channel scale for `alpha='auto'`: mean magnitude of the channel.
    pub fn auto_scale(&self, channel: &[f64]) -> f64 {
        if channel.is_empty() {
            return 1.0;
        }
        let mean = channel.iter().map(|w| w.abs()).sum::<f64>() / channel.len() as f64;
        if mean > 0.0 {
            mean
        } else {
            1.0
        }
    }
}

pub(crate) fn xnor_type() -> Result<NumericType> {
    Ok(NumericType::integer(1, false)?)
}

pub(crate) fn select(x: f64, is_xnor: bool) -> f64 {
    match (x >= 0.0, is_xnor) {
        (true, _) => 1.0,
        (false, true) => 0.0,
        (false, false) => -1.0,
    }
}
