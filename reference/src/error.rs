use quantizers::QuantizerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Layer '{layer}': {source}")]
    Quantizer {
        layer: String,
        #[source]
        source: QuantizerError,
    },

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

pub type Result<T> = std::result::Result<T, ReferenceError>;
