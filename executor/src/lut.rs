//! Lookup tables for the softmax layer.
//!
//! Entries are computed in host floats once, at compile time, and snapped onto the
//! table's numeric type with saturation so out-of-range entries clip instead of wrap.

use std::num::NonZeroUsize;

use fixed::{Fixed, NumericType, SaturationMode};

use crate::error::Result;

/// `exp(d)` for `d` in `[-range, 0]`, sampled at `size` evenly spaced points.
#[derive(Debug, Clone)]
pub struct ExpTable {
    entries: Vec<Fixed>,
    range: f64,
}

impl ExpTable {
    /// `input_integer_bits` bounds the spread of the softmax inputs: `max - x < 2^I`.
    pub fn new(size: NonZeroUsize, input_integer_bits: i32, ty: NumericType) -> Result<Self> {
        let size = size.get();
        let range = (input_integer_bits as f64).exp2();
        let ty = ty.with_saturation(SaturationMode::Saturate);
        let entries = (0..size)
            .map(|i| Fixed::from_f64(sample_point(i, size, range).exp(), ty))
            .collect::<fixed::Result<Vec<_>>>()?;
        Ok(Self { entries, range })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry nearest to `d` (expected `<= 0`); values outside the domain clamp to its ends.
    pub fn lookup(&self, d: Fixed) -> Fixed {
        let last = self.entries.len().saturating_sub(1);
        let position = (d.to_f64() + self.range) / self.range * last as f64;
        self.entries[clamp_index(position.round(), last)]
    }
}

/// `1 / s` for `s` in `(0, limit]`, sampled at `limit * (j + 1) / size`.
#[derive(Debug, Clone)]
pub struct InvTable {
    entries: Vec<Fixed>,
    limit: f64,
}

impl InvTable {
    pub fn new(size: NonZeroUsize, limit: f64, ty: NumericType) -> Result<Self> {
        let size = size.get();
        let ty = ty.with_saturation(SaturationMode::Saturate);
        let entries = (0..size)
            .map(|j| Fixed::from_f64(size as f64 / (limit * (j + 1) as f64), ty))
            .collect::<fixed::Result<Vec<_>>>()?;
        Ok(Self { entries, limit })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn lookup(&self, s: Fixed) -> Fixed {
        let size = self.entries.len();
        let position = s.to_f64() / self.limit * size as f64 - 1.0;
        self.entries[clamp_index(position.round(), size.saturating_sub(1))]
    }
}

fn sample_point(i: usize, size: usize, range: f64) -> f64 {
    if size <= 1 {
        return 0.0;
    }
    -range + range * i as f64 / (size - 1) as f64
}

fn clamp_index(position: f64, last: usize) -> usize {
    if position.is_nan() || position <= 0.0 {
        0
    } else {
        (position as usize).min(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> NumericType {
        s.parse().unwrap()
    }

    fn entries(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn fx(v: f64) -> Fixed {
        Fixed::from_f64(v, ty("fixed<32,12>")).unwrap()
    }

    #[test]
    fn test_exp_table_endpoints() {
        let table = ExpTable::new(entries(1024), 6, ty("fixed<18,8>")).unwrap();
        assert_eq!(table.len(), 1024);
        assert_eq!(table.lookup(fx(0.0)).to_f64(), 1.0);
        assert_eq!(table.lookup(fx(-64.0)).to_f64(), 0.0);
        assert_eq!(table.lookup(fx(-1000.0)).to_f64(), 0.0);

        let approx = table.lookup(fx(-1.0)).to_f64();
        assert!((approx - (-1.0f64).exp()).abs() < 0.03, "exp(-1) ~ {}", approx);
    }

    #[test]
    fn test_inv_table() {
        let table = InvTable::new(entries(1024), 5.0, ty("fixed<18,4>")).unwrap();
        assert_eq!(table.len(), 1024);
        assert!((table.lookup(fx(1.0)).to_f64() - 1.0).abs() < 0.01);
        assert!((table.lookup(fx(2.5)).to_f64() - 0.4).abs() < 0.01);
        assert!((table.lookup(fx(100.0)).to_f64() - 0.2).abs() < 0.01);
        // Tiny sums hit the saturated top of the table instead of wrapping
        assert_eq!(table.lookup(fx(0.0)).to_f64(), ty("fixed<18,4>").max_value());
    }

    #[test]
    fn test_single_entry_tables() {
        let exp = ExpTable::new(entries(1), 4, ty("fixed<18,8>")).unwrap();
        assert_eq!(exp.lookup(fx(-3.0)).to_f64(), 1.0);
    }
}
