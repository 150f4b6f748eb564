//! Graph model, precision resolution and the rounding/saturation pass.

mod config;
mod description;
mod error;
mod graph;
mod layer;
mod optimizer;
mod resolver;

pub use config::{default_precision, Granularity, LayerOverrides, PrecisionConfig, TypeOverride};
pub use description::{LayerDescription, LayerKindDescription, NetworkDescription};
pub use error::{ModelError, Result};
pub use graph::Graph;
pub use layer::{ActivationFunction, Layer, LayerKind, Port, Ports, DEFAULT_TABLE_SIZE};
pub use optimizer::OutputRoundingSaturation;
pub use resolver::{
    apply_overrides, config_from_graph, default_exp_table, default_inv_table, derive_ports,
    effective_type, infer_accumulator, resolve,
};
