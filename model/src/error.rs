use fixed::FixedError;
use quantizers::QuantizerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("Layer '{layer}' has no resolved {port} type")]
    UnresolvedType { layer: String, port: String },

    #[error("Layer '{layer}': {source}")]
    UnsupportedQuantizer {
        layer: String,
        #[source]
        source: QuantizerError,
    },

    #[error("Fixed-point error: {0}")]
    Fixed(#[from] FixedError),
}

pub type Result<T> = std::result::Result<T, ModelError>;
