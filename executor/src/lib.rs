//! Bit-accurate execution of a resolved graph.
//!
//! `compile` turns a graph whose ports are all typed into an [`Executor`]; every
//! intermediate value is an exact fixed-point number narrowed through the layer's
//! accumulator and result types, the way the hardware registers would hold it.

mod error;
mod executor;
mod lut;
mod output;

#[cfg(test)]
mod tests;

pub use error::{ExecutorError, NumericFault, Result, Stage};
pub use executor::{compile, Executor};
pub use output::{argmax, BatchOutput};
