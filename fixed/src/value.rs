use std::fmt;

use crate::error::{FixedError, Result};
use crate::numeric_type::{scale_up, NumericType};

/// Above this magnitude a scaled host float is outside every supported type.
const F64_RAW_LIMIT: f64 = 1.0e38;

/// An exact fixed-point value: `raw * 2^-frac`.
///
/// Arithmetic is exact (products add fractional bits, sums align them); precision is
/// only ever lost through `narrow`, which applies a type's rounding and saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fixed {
    raw: i128,
    frac: i32,
}

impl Fixed {
    pub const ZERO: Fixed = Fixed { raw: 0, frac: 0 };

    pub fn from_raw(raw: i128, frac: i32) -> Self {
        Self { raw, frac }
    }

    /// Quantizes a host float onto `ty`'s grid.
    pub fn from_f64(value: f64, ty: NumericType) -> Result<Self> {
        if !value.is_finite() {
            return Err(FixedError::NonFinite(value));
        }

        let frac = ty.fractional_bits();
        let rounded = ty.rounding_mode().round_f64(value * (frac as f64).exp2());

        let raw = if rounded.abs() < F64_RAW_LIMIT {
            ty.overflow_raw(rounded as i128)
        } else {
            // Such floats are multiples of 2^74, so wrapping leaves nothing behind.
            let sign: i128 = if rounded < 0.0 { -1 } else { 1 };
            ty.narrow_raw(sign << 126, frac)
        };

        Ok(Self { raw, frac })
    }

    pub fn raw(&self) -> i128 {
        self.raw
    }

    pub fn frac(&self) -> i32 {
        self.frac
    }

    pub fn to_f64(self) -> f64 {
        self.raw as f64 * (-self.frac as f64).exp2()
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    pub fn is_negative(&self) -> bool {
        self.raw < 0
    }

    pub fn checked_mul(self, other: Self) -> Result<Self> {
        let raw = self
            .raw
            .checked_mul(other.raw)
            .ok_or(FixedError::Overflow("multiplication"))?;
        Ok(Self {
            raw,
            frac: self.frac + other.frac,
        })
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        let frac = self.frac.max(other.frac);
        let lhs = self.align(frac)?;
        let rhs = other.align(frac)?;
        let raw = lhs
            .checked_add(rhs)
            .ok_or(FixedError::Overflow("addition"))?;
        Ok(Self { raw, frac })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.checked_add(Self {
            raw: other
                .raw
                .checked_neg()
                .ok_or(FixedError::Overflow("negation"))?,
            frac: other.frac,
        })
    }

    /// Rounds and saturates (or wraps) into `ty`, in that order.
    pub fn narrow(self, ty: NumericType) -> Self {
        Self {
            raw: ty.narrow_raw(self.raw, self.frac),
            frac: ty.fractional_bits(),
        }
    }

    /// Maps an XNOR code (0 or 1) to its bipolar value (-1 or +1).
    pub fn decode_bipolar(self) -> Result<Self> {
        let doubled = self.checked_add(self)?;
        doubled.checked_sub(Fixed::from_raw(1, 0))
    }

    /// Compares represented values, independent of fractional scale.
    pub fn cmp_value(&self, other: &Self) -> std::cmp::Ordering {
        match self.checked_sub(*other) {
            Ok(diff) => diff.raw.cmp(&0),
            // Only reachable for values astronomically far apart, where floats decide fine.
            Err(_) => self.to_f64().total_cmp(&other.to_f64()),
        }
    }

    // Raw value re-expressed with `frac` fractional bits (frac >= self.frac).
    fn align(&self, frac: i32) -> Result<i128> {
        scale_up(self.raw, (frac - self.frac) as u32).ok_or(FixedError::Overflow("alignment"))
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}
