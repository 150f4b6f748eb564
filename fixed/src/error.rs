use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixedError {
    #[error("Invalid width: {total_bits} total bits with {integer_bits} integer bits")]
    InvalidWidth { total_bits: u32, integer_bits: i32 },

    #[error("Cannot parse numeric type '{0}'")]
    Parse(String),

    #[error("Unknown rounding mode '{0}'")]
    UnknownRounding(String),

    #[error("Unknown saturation mode '{0}'")]
    UnknownSaturation(String),

    #[error("Non-finite value {0} cannot be quantized")]
    NonFinite(f64),

    #[error("Fixed-point overflow during {0}")]
    Overflow(&'static str),
}

pub type Result<T> = std::result::Result<T, FixedError>;
