use fixed::{RoundingMode, SaturationMode};
use log::debug;

use crate::error::{ModelError, Result};
use crate::graph::Graph;
use crate::layer::{Layer, Port};

/// Rewrites the rounding and saturation of targeted layers' output types.
///
/// Targets match a layer name or a class name (`"Activation"` hits every
/// activation layer). Width, integer bits and sign are never touched, so applying
/// the pass twice gives the same graph as applying it once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRoundingSaturation {
    pub layers: Vec<String>,
    pub rounding: RoundingMode,
    pub saturation: SaturationMode,
}

impl OutputRoundingSaturation {
    pub fn new(layers: &[&str], rounding: RoundingMode, saturation: SaturationMode) -> Self {
        Self {
            layers: layers.iter().map(|s| s.to_string()).collect(),
            rounding,
            saturation,
        }
    }

    pub fn targets(&self, layer: &Layer) -> bool {
        self.layers
            .iter()
            .any(|t| t == layer.name() || t == layer.class_name())
    }

    /// Applies the pass to a resolved graph, returning how many layers changed.
    ///
    /// Every target is checked before any is rewritten, so a failure leaves the
    /// graph untouched.
    pub fn apply(&self, graph: &mut Graph) -> Result<usize> {
        if let Some(layer) = graph
            .layers()
            .iter()
            .find(|layer| self.targets(layer) && layer.ports().result.is_none())
        {
            return Err(ModelError::UnresolvedType {
                layer: layer.name().to_string(),
                port: Port::Result.to_string(),
            });
        }

        let mut changed = 0;
        for layer in graph.layers_mut() {
            if !self.targets(layer) {
                continue;
            }
            let Some(result) = layer.ports().result else {
                continue;
            };

            let updated = result.with_modes(self.rounding, self.saturation);
            if updated != result {
                debug!("Output of '{}': {} -> {}", layer.name(), result, updated);
                layer.ports_mut().result = Some(updated);
                changed += 1;
            }
        }

        debug!(
            "Rounding/saturation pass ({}, {}) on {:?} changed {} layers",
            self.rounding, self.saturation, self.layers, changed
        );
        Ok(changed)
    }
}
