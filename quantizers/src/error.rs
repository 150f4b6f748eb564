use fixed::FixedError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantizerError {
    #[error("Unsupported quantizer: {0}")]
    Unsupported(String),

    #[error("Cannot parse quantizer '{0}'")]
    Parse(String),

    #[error("Invalid quantizer parameter: {0}")]
    InvalidParameter(String),

    #[error("Fixed-point error: {0}")]
    Fixed(#[from] FixedError),
}

pub type Result<T> = std::result::Result<T, QuantizerError>;
