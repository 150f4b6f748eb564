use std::fmt;

use fixed::FixedError;
use quantizers::QuantizerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Layer '{layer}' has no resolved {port} type")]
    UnresolvedType { layer: String, port: String },

    #[error("Layer '{layer}' has a non-finite {parameter} value")]
    NonFiniteParameter { layer: String, parameter: &'static str },

    #[error("Layer '{layer}' has a lookup table of size {size}")]
    InvalidTableSize { layer: String, size: usize },

    #[error("Layer '{layer}': {source}")]
    Quantizer {
        layer: String,
        #[source]
        source: QuantizerError,
    },

    #[error("Fixed-point error: {0}")]
    Fixed(#[from] FixedError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Where a layer is in its evaluation of one batch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Quantizing,
    Accumulating,
    Narrowing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Quantizing => "quantizing",
            Stage::Accumulating => "accumulating",
            Stage::Narrowing => "narrowing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Arithmetic failure of a single batch element. Other elements are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Numeric fault in layer '{layer}' while {stage}: {reason}")]
pub struct NumericFault {
    pub layer: String,
    pub stage: Stage,
    pub reason: String,
}
