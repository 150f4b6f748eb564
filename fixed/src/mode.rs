use std::fmt;
use std::str::FromStr;

use crate::error::FixedError;

/// How fractional precision is dropped when a value is narrowed onto a coarser grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoundingMode {
    /// Drop fractional bits toward negative infinity (two's complement truncation).
    #[default]
    Truncate,
    /// Nearest grid point, ties away from zero.
    RoundNearest,
    /// Nearest grid point, ties to even.
    RoundNearestEven,
}

impl RoundingMode {
    pub fn suffix(self) -> &'static str {
        match self {
            RoundingMode::Truncate => "TRN",
            RoundingMode::RoundNearest => "RND",
            RoundingMode::RoundNearestEven => "RND_CONV",
        }
    }

    /// Divides `raw` by `2^shift` and picks the integer this mode selects.
    pub fn shift_right(self, raw: i128, shift: u32) -> i128 {
        if shift == 0 {
            return raw;
        }

        // Beyond 127 bits every raw value sits strictly inside (-1, 1) except i128::MIN.
        if shift >= 128 {
            let tie = raw == i128::MIN && shift == 128;
            return match self {
                RoundingMode::Truncate => {
                    if raw < 0 {
                        -1
                    } else {
                        0
                    }
                }
                RoundingMode::RoundNearest if tie => -1,
                _ => 0,
            };
        }

        let floor = raw >> shift;
        let remainder = (raw as u128) & ((1u128 << shift) - 1);
        let half = 1u128 << (shift - 1);

        match self {
            RoundingMode::Truncate => floor,
            RoundingMode::RoundNearest => {
                if remainder > half || (remainder == half && raw >= 0) {
                    floor + 1
                } else {
                    floor
                }
            }
            RoundingMode::RoundNearestEven => {
                if remainder > half || (remainder == half && floor & 1 == 1) {
                    floor + 1
                } else {
                    floor
                }
            }
        }
    }

    /// Rounds an already scaled host float to an integer.
    pub fn round_f64(self, scaled: f64) -> f64 {
        match self {
            RoundingMode::Truncate => scaled.floor(),
            RoundingMode::RoundNearest => scaled.round(),
            RoundingMode::RoundNearestEven => scaled.round_ties_even(),
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for RoundingMode {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("AP_").unwrap_or(&upper) {
            "TRN" | "TRUNCATE" => Ok(RoundingMode::Truncate),
            "RND" | "ROUND_NEAREST" => Ok(RoundingMode::RoundNearest),
            "RND_CONV" | "ROUND_NEAREST_EVEN" => Ok(RoundingMode::RoundNearestEven),
            _ => Err(FixedError::UnknownRounding(s.to_string())),
        }
    }
}

/// What happens to values that fall outside a type's representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SaturationMode {
    /// Modular reduction into the range, dropping the high bits.
    #[default]
    Wrap,
    /// Clamp to the nearest representable extreme.
    Saturate,
}

impl SaturationMode {
    pub fn suffix(self) -> &'static str {
        match self {
            SaturationMode::Wrap => "WRAP",
            SaturationMode::Saturate => "SAT",
        }
    }
}

impl fmt::Display for SaturationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for SaturationMode {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("AP_").unwrap_or(&upper) {
            "WRAP" => Ok(SaturationMode::Wrap),
            "SAT" | "SATURATE" => Ok(SaturationMode::Saturate),
            _ => Err(FixedError::UnknownSaturation(s.to_string())),
        }
    }
}
