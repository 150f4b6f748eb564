use fixed::NumericType;

use crate::binary;
use crate::error::{QuantizerError, Result};
use crate::quantizer::Alpha;

/// Uniform grid quantizer (`quantized_bits` / `quantized_relu`).
///
/// `integer` counts the bits above the binary point excluding the sign, so
/// `quantized_bits(4,0)` covers `[-1, 0.875]` in steps of `1/8`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub bits: u32,
    pub integer: i32,
    pub symmetric: bool,
    pub keep_negative: bool,
    pub alpha: Alpha,
}

impl Uniform {
    pub fn new(bits: u32, integer: i32) -> Result<Self> {
        if bits == 0 || bits > fixed::MAX_TOTAL_BITS {
            return Err(QuantizerError::InvalidParameter(format!(
                "uniform quantizer needs 1 to {} bits, got {}",
                fixed::MAX_TOTAL_BITS,
                bits
            )));
        }

        Ok(Self {
            bits,
            integer,
            symmetric: false,
            keep_negative: true,
            alpha: Alpha::default(),
        })
    }

    /// Unsigned variant, i.e. ReLU followed by the grid.
    pub fn relu(bits: u32, integer: i32) -> Result<Self> {
        Ok(Self {
            keep_negative: false,
            ..Self::new(bits, integer)?
        })
    }

    /// A single bit carries no magnitude, so it is encoded as an XNOR code.
    pub fn is_binary(&self) -> bool {
        self.bits == 1
    }

    pub fn numeric_type(&self) -> Result<NumericType> {
        if self.is_binary() {
            return binary::xnor_type();
        }
        let sign_bit = self.keep_negative as i32;
        Ok(NumericType::new(
            self.bits,
            self.integer + sign_bit,
            self.keep_negative,
        )?)
    }

    pub fn project(&self, x: f64) -> f64 {
        if self.is_binary() {
            return binary::select(x, true);
        }

        let unsigned_bits = (self.bits - self.keep_negative as u32) as i32;
        let step = ((self.integer - unsigned_bits) as f64).exp2();
        let levels = (unsigned_bits as f64).exp2();

        let lowest = if self.keep_negative {
            -levels + self.symmetric as i32 as f64
        } else {
            0.0
        };
        let highest = levels - 1.0;

        (x / step).round_ties_even().clamp(lowest, highest) * step
    }

    /// Per-channel scale for `alpha='auto'`: the channel's largest magnitude maps to
    /// the top of the integer range.
    pub fn auto_scale(&self, channel: &[f64]) -> f64 {
        let peak = channel.iter().fold(0.0f64, |acc, &w| acc.max(w.abs()));
        if peak > 0.0 {
            peak / (self.integer as f64).exp2()
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_grid() {
        let q = Uniform::new(4, 0).unwrap();
        assert_eq!(q.numeric_type().unwrap().to_string(), "fixed<4,1>");
        assert_eq!(q.project(0.3), 0.25);
        assert_eq!(q.project(0.3125), 0.25); // tie goes to the even code
        assert_eq!(q.project(5.0), 0.875);
        assert_eq!(q.project(-5.0), -1.0);
    }

    #[test]
    fn test_integer_bits_shift_the_range() {
        let q = Uniform::new(8, 4).unwrap();
        assert_eq!(q.numeric_type().unwrap().to_string(), "fixed<8,5>");
        assert_eq!(q.project(100.0), 15.875);
        assert_eq!(q.project(-100.0), -16.0);
        assert_eq!(q.project(1.0625), 1.0);
    }

    #[test]
    fn test_symmetric_drops_lowest_code() {
        let q = Uniform {
            symmetric: true,
            ..Uniform::new(4, 0).unwrap()
        };
        assert_eq!(q.project(-5.0), -0.875);
    }

    #[test]
    fn test_relu_variant_is_unsigned() {
        let q = Uniform::relu(4, 2).unwrap();
        assert_eq!(q.numeric_type().unwrap().to_string(), "ufixed<4,2>");
        assert_eq!(q.project(-1.0), 0.0);
        assert_eq!(q.project(10.0), 3.75);
        assert_eq!(q.project(1.1), 1.0);
    }

    #[test]
    fn test_single_bit_is_binary() {
        let q = Uniform::new(1, 0).unwrap();
        assert_eq!(q.numeric_type().unwrap().to_string(), "ufixed<1,1>");
        assert_eq!(q.project(0.4), 1.0);
        assert_eq!(q.project(-0.4), 0.0);
    }

    #[test]
    fn test_rejects_zero_bits() {
        assert!(Uniform::new(0, 0).is_err());
        assert!(Uniform::new(65, 0).is_err());
    }

    #[test]
    fn test_auto_scale() {
        let q = Uniform::new(4, 0).unwrap();
        assert_eq!(q.auto_scale(&[0.1, -0.5, 0.25]), 0.5);
        assert_eq!(q.auto_scale(&[0.0, 0.0]), 1.0);
    }
}
