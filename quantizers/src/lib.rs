//! Training-library quantizers and their fixed-point meaning.

mod binary;
mod error;
mod quantizer;
mod spec;
mod ternary;
mod uniform;

pub use binary::Binary;
pub use error::{QuantizerError, Result};
pub use quantizer::{ActivationKind, Alpha, Encoding, QuantizedTensor, Quantizer, Resolution};
pub use spec::{QuantizerSpec, SpecValue};
pub use ternary::{Ternary, DEFAULT_THRESHOLD};
pub use uniform::Uniform;
