use std::fmt;
use std::str::FromStr;

use crate::error::{FixedError, Result};
use crate::mode::{RoundingMode, SaturationMode};
use crate::value::Fixed;

/// Widest type the executor handles; products of two such values still fit in i128.
pub const MAX_TOTAL_BITS: u32 = 64;

const MIN_INTEGER_BITS: i32 = -64;
const MAX_INTEGER_BITS: i32 = 128;

/// A fixed-point representation: `total_bits` wide with `integer_bits` above the
/// binary point (the sign bit included for signed types).
///
/// The value set is fully determined by the five fields. Types are immutable;
/// `with_rounding`/`with_saturation` return an updated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericType {
    total_bits: u32,
    integer_bits: i32,
    signed: bool,
    rounding: RoundingMode,
    saturation: SaturationMode,
}

impl NumericType {
    /// `fixed<16,6>` with truncation and wrapping.
    pub const DEFAULT_PRECISION: NumericType = NumericType {
        total_bits: 16,
        integer_bits: 6,
        signed: true,
        rounding: RoundingMode::Truncate,
        saturation: SaturationMode::Wrap,
    };

    pub fn new(total_bits: u32, integer_bits: i32, signed: bool) -> Result<Self> {
        if total_bits == 0
            || total_bits > MAX_TOTAL_BITS
            || !(MIN_INTEGER_BITS..=MAX_INTEGER_BITS).contains(&integer_bits)
        {
            return Err(FixedError::InvalidWidth {
                total_bits,
                integer_bits,
            });
        }

        Ok(Self {
            total_bits,
            integer_bits,
            signed,
            rounding: RoundingMode::default(),
            saturation: SaturationMode::default(),
        })
    }

    /// Signed `fixed<W,I>`.
    pub fn fixed(total_bits: u32, integer_bits: i32) -> Result<Self> {
        Self::new(total_bits, integer_bits, true)
    }

    /// Unsigned `ufixed<W,I>`.
    pub fn ufixed(total_bits: u32, integer_bits: i32) -> Result<Self> {
        Self::new(total_bits, integer_bits, false)
    }

    /// Integer type, i.e. no fractional bits.
    pub fn integer(total_bits: u32, signed: bool) -> Result<Self> {
        Self::new(total_bits, total_bits as i32, signed)
    }

    pub fn with_rounding(self, rounding: RoundingMode) -> Self {
        Self { rounding, ..self }
    }

    pub fn with_saturation(self, saturation: SaturationMode) -> Self {
        Self { saturation, ..self }
    }

    pub fn with_modes(self, rounding: RoundingMode, saturation: SaturationMode) -> Self {
        Self {
            rounding,
            saturation,
            ..self
        }
    }

    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    pub fn integer_bits(&self) -> i32 {
        self.integer_bits
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn rounding_mode(&self) -> RoundingMode {
        self.rounding
    }

    pub fn saturation_mode(&self) -> SaturationMode {
        self.saturation
    }

    pub fn fractional_bits(&self) -> i32 {
        self.total_bits as i32 - self.integer_bits
    }

    /// Distance between neighbouring grid points.
    pub fn step(&self) -> f64 {
        (-self.fractional_bits() as f64).exp2()
    }

    pub fn raw_min(&self) -> i128 {
        if self.signed {
            -(1i128 << (self.total_bits - 1))
        } else {
            0
        }
    }

    pub fn raw_max(&self) -> i128 {
        if self.signed {
            (1i128 << (self.total_bits - 1)) - 1
        } else {
            (1i128 << self.total_bits) - 1
        }
    }

    pub fn min_value(&self) -> f64 {
        Fixed::from_raw(self.raw_min(), self.fractional_bits()).to_f64()
    }

    pub fn max_value(&self) -> f64 {
        Fixed::from_raw(self.raw_max(), self.fractional_bits()).to_f64()
    }

    /// True when `value` is exactly one of this type's grid points.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() || value < self.min_value() || value > self.max_value() {
            return false;
        }
        let scaled = value * (self.fractional_bits() as f64).exp2();
        scaled == scaled.trunc()
    }

    /// Snaps a host float onto this type's grid (rounding, then saturation).
    pub fn quantize(&self, value: f64) -> Result<f64> {
        Fixed::from_f64(value, *self).map(Fixed::to_f64)
    }

    /// Brings an integer already at this type's fractional scale into range.
    pub fn overflow_raw(&self, raw: i128) -> i128 {
        match self.saturation {
            SaturationMode::Saturate => raw.clamp(self.raw_min(), self.raw_max()),
            SaturationMode::Wrap => {
                let modulus = 1i128 << self.total_bits;
                let wrapped = raw.rem_euclid(modulus);
                if self.signed && wrapped >= modulus / 2 {
                    wrapped - modulus
                } else {
                    wrapped
                }
            }
        }
    }

    /// Narrows `raw * 2^-frac` into this type: rounding first, then saturation.
    pub fn narrow_raw(&self, raw: i128, frac: i32) -> i128 {
        let target = self.fractional_bits();

        if frac >= target {
            let rounded = self.rounding.shift_right(raw, (frac - target) as u32);
            return self.overflow_raw(rounded);
        }

        let shift = (target - frac) as u32;
        match scale_up(raw, shift) {
            Some(scaled) => self.overflow_raw(scaled),
            None => match self.saturation {
                SaturationMode::Saturate => {
                    if raw < 0 {
                        self.raw_min()
                    } else {
                        self.raw_max()
                    }
                }
                // Only the low `total_bits` survive a wrap, so reduce before shifting.
                SaturationMode::Wrap => {
                    if shift >= self.total_bits {
                        0
                    } else {
                        let reduced = self.overflow_raw(raw);
                        self.overflow_raw(reduced << shift)
                    }
                }
            },
        }
    }
}

/// `raw * 2^shift`, or None on i128 overflow.
pub(crate) fn scale_up(raw: i128, shift: u32) -> Option<i128> {
    if raw == 0 {
        return Some(0);
    }
    if shift >= 127 {
        return None;
    }
    raw.checked_mul(1i128 << shift)
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.signed { "fixed" } else { "ufixed" };
        write!(f, "{}<{},{}", name, self.total_bits, self.integer_bits)?;
        if self.rounding != RoundingMode::default() || self.saturation != SaturationMode::default()
        {
            write!(f, ",{},{}", self.rounding, self.saturation)?;
        }
        write!(f, ">")
    }
}

impl FromStr for NumericType {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self> {
        let parse_error = || FixedError::Parse(s.to_string());

        let trimmed = s.trim();
        let (name, rest) = trimmed.split_once('<').ok_or_else(parse_error)?;
        let body = rest.strip_suffix('>').ok_or_else(parse_error)?;
        let args: Vec<&str> = body.split(',').map(str::trim).collect();

        let name = name.trim().to_ascii_lowercase();
        let name = name.strip_prefix("ap_").unwrap_or(&name);

        let int_arg = |idx: usize| -> Result<i64> {
            args.get(idx)
                .and_then(|a| a.parse::<i64>().ok())
                .ok_or_else(parse_error)
        };
        let width = |value: i64| u32::try_from(value).map_err(|_| parse_error());

        let ty = match name {
            "fixed" | "ufixed" => {
                if args.len() < 2 || args.len() > 4 {
                    return Err(parse_error());
                }
                let total_bits = width(int_arg(0)?)?;
                let integer_bits = i32::try_from(int_arg(1)?).map_err(|_| parse_error())?;
                let mut ty = NumericType::new(total_bits, integer_bits, name == "fixed")?;
                if let Some(rounding) = args.get(2) {
                    ty = ty.with_rounding(rounding.parse()?);
                }
                if let Some(saturation) = args.get(3) {
                    ty = ty.with_saturation(saturation.parse()?);
                }
                ty
            }
            "int" | "uint" => {
                if args.len() != 1 {
                    return Err(parse_error());
                }
                NumericType::integer(width(int_arg(0)?)?, name == "int")?
            }
            _ => return Err(parse_error()),
        };

        Ok(ty)
    }
}
