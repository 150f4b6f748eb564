//! Conversion of quantized networks into bit-accurate fixed-point executors.
//!
//! ```no_run
//! use fixed::{RoundingMode, SaturationMode};
//! use model::{LayerDescription, NetworkDescription};
//! use quantfx::{convert, ConversionConfig};
//!
//! let description = NetworkDescription::new()
//!     .with(LayerDescription::input("x", 2))
//!     .with(
//!         LayerDescription::dense("fc", 1, vec![0.5, -0.25], None)
//!             .with_quantizers(Some("quantized_bits(4,0)"), None),
//!     )
//!     .with(LayerDescription::activation("relu", "quantized_relu(4,0)"));
//!
//! let config = ConversionConfig::default().with_rounding_pass(
//!     &["Activation"],
//!     RoundingMode::RoundNearestEven,
//!     SaturationMode::Saturate,
//! );
//! let executor = convert(&description, &config)?;
//! let output = executor.predict(&[vec![1.0, 0.5]]);
//! # Ok::<(), quantfx::ConvertError>(())
//! ```

mod conversion;
mod dataset;
mod error;
mod parity;

pub use conversion::{build_graph, convert, ConversionConfig};
pub use dataset::{uniform_rows, Clusters};
pub use error::ConvertError;
pub use parity::{accuracy, compare, Parity};
