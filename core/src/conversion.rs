use executor::{compile, Executor};
use fixed::{RoundingMode, SaturationMode};
use log::{debug, info};
use model::{resolve, Graph, NetworkDescription, OutputRoundingSaturation, PrecisionConfig};

use crate::error::ConvertError;

/// Everything a conversion needs besides the network itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionConfig {
    pub precision: PrecisionConfig,
    /// Rewrites output rounding/saturation of the targeted layers after resolution.
    pub rounding_pass: Option<OutputRoundingSaturation>,
}

impl ConversionConfig {
    pub fn new(precision: PrecisionConfig) -> Self {
        Self {
            precision,
            rounding_pass: None,
        }
    }

    pub fn with_rounding_pass(
        mut self,
        layers: &[&str],
        rounding: RoundingMode,
        saturation: SaturationMode,
    ) -> Self {
        self.rounding_pass = Some(OutputRoundingSaturation::new(layers, rounding, saturation));
        self
    }

    /// Sets a precision entry from its dotted key, e.g. `LayerName.fc1.Precision.weight`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConvertError> {
        self.precision.set(key, value)?;
        debug!("Set '{}' to '{}'", key, value);
        Ok(())
    }
}

/// Builds, resolves and rewrites the graph without compiling it.
pub fn build_graph(
    description: &NetworkDescription,
    config: &ConversionConfig,
) -> Result<Graph, ConvertError> {
    let mut graph = Graph::from_description(description)?;
    resolve(&mut graph, &config.precision)?;

    if let Some(pass) = &config.rounding_pass {
        let changed = pass.apply(&mut graph)?;
        debug!(
            "Output rounding/saturation set to {}/{} on {} layers",
            pass.rounding, pass.saturation, changed
        );
    }

    Ok(graph)
}

/// Runs the whole chain: graph, precision resolution, rounding pass, compilation.
pub fn convert(
    description: &NetworkDescription,
    config: &ConversionConfig,
) -> Result<Executor, ConvertError> {
    let graph = build_graph(description, config)?;
    let executor = compile(&graph)?;
    info!(
        "Converted network with {} layers ({} -> {} features)",
        graph.layers().len(),
        executor.input_features(),
        executor.output_features()
    );
    Ok(executor)
}
