//! Floating-point simulation of quantized networks on candle tensors.
//!
//! Serves as the oracle the fixed-point executor is compared against.

mod builder;
mod error;
mod qmodel;
pub mod quantize;


pub use builder::DenseStack;
pub use error::{ReferenceError, Result};
pub use qmodel::QModel;
