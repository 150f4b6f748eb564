//! Fixed-point numeric types.
//!
//! `NumericType` describes a representation (width, integer bits, signedness,
//! rounding and saturation) and `Fixed` is an exact value narrowed through it.

mod error;
mod mode;
mod numeric_type;
mod value;

pub use error::{FixedError, Result};
pub use mode::{RoundingMode, SaturationMode};
pub use numeric_type::{NumericType, MAX_TOTAL_BITS};
pub use value::Fixed;
