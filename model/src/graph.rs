use std::collections::VecDeque;

use ahash::AHashMap;
use quantizers::Quantizer;

use crate::description::{LayerKindDescription, NetworkDescription};
use crate::error::{ModelError, Result};
use crate::layer::{ActivationFunction, Layer, LayerKind, Port};

/// A validated network: layers in description order plus a topological order.
///
/// Topology never changes after construction; the resolver and the rounding pass
/// only touch port types.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    layers: Vec<Layer>,
    order: Vec<usize>,
    input: usize,
    output: usize,
}

impl Graph {
    pub fn from_description(description: &NetworkDescription) -> Result<Self> {
        let invalid = |msg: String| ModelError::InvalidGraph(msg);
        let specs = &description.layers;

        if specs.is_empty() {
            return Err(invalid("network has no layers".to_string()));
        }

        let mut index_of: AHashMap<&str, usize> = AHashMap::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            if index_of.insert(spec.name.as_str(), idx).is_some() {
                return Err(invalid(format!("duplicate layer name '{}'", spec.name)));
            }
        }

        let mut edges: Vec<Vec<usize>> = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut inputs = Vec::with_capacity(spec.inputs.len());
            for name in &spec.inputs {
                let idx = index_of.get(name.as_str()).ok_or_else(|| {
                    invalid(format!("layer '{}' reads unknown layer '{}'", spec.name, name))
                })?;
                inputs.push(*idx);
            }
            edges.push(inputs);
        }

        let input_layers: Vec<usize> = specs
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, LayerKindDescription::Input { .. }))
            .map(|(idx, _)| idx)
            .collect();
        let input = match input_layers.as_slice() {
            [single] => *single,
            _ => {
                return Err(invalid(format!(
                    "expected exactly one input layer, found {}",
                    input_layers.len()
                )))
            }
        };

        let order = topological_order(&edges)
            .ok_or_else(|| invalid("network contains a cycle".to_string()))?;

        let mut consumers = vec![0usize; specs.len()];
        for inputs in &edges {
            for &idx in inputs {
                consumers[idx] += 1;
            }
        }
        let sinks: Vec<usize> = (0..specs.len()).filter(|&i| consumers[i] == 0).collect();
        let output = match sinks.as_slice() {
            [single] => *single,
            _ => {
                let names: Vec<&str> = sinks.iter().map(|&i| specs[i].name.as_str()).collect();
                return Err(invalid(format!("expected a single output layer, found {:?}", names)));
            }
        };

        let mut built: Vec<Option<Layer>> = vec![None; specs.len()];
        for &idx in &order {
            let spec = &specs[idx];
            let inputs = edges[idx].clone();
            let widths: Vec<usize> = inputs
                .iter()
                .map(|&i| built[i].as_ref().map_or(0, Layer::features))
                .collect();
            let (kind, features) = build_kind(&spec.name, &spec.kind, &widths)?;
            built[idx] = Some(Layer::new(spec.name.clone(), kind, inputs, features));
        }

        let layers = built
            .into_iter()
            .collect::<Option<Vec<Layer>>>()
            .ok_or_else(|| invalid("unreachable layer".to_string()))?;

        Ok(Self {
            layers,
            order,
            input,
            output,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer(&self, idx: usize) -> &Layer {
        &self.layers[idx]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name() == name)
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.find(name).map(|idx| &self.layers[idx])
    }

    /// Layer indices such that every layer comes after its inputs.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn input_index(&self) -> usize {
        self.input
    }

    pub fn output_index(&self) -> usize {
        self.output
    }

    pub fn input_features(&self) -> usize {
        self.layers[self.input].features()
    }

    pub fn output_features(&self) -> usize {
        self.layers[self.output].features()
    }

    /// First layer (in topological order) with a required port still untyped.
    pub fn first_unresolved(&self) -> Option<(&Layer, Port)> {
        self.order.iter().find_map(|&idx| {
            let layer = &self.layers[idx];
            layer.unresolved_port().map(|port| (layer, port))
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.first_unresolved().is_none()
    }
}

// Kahn's algorithm, ties broken by description order. None on a cycle.
fn topological_order(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut pending: Vec<usize> = edges.iter().map(Vec::len).collect();
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); edges.len()];
    for (idx, inputs) in edges.iter().enumerate() {
        for &input in inputs {
            consumers[input].push(idx);
        }
    }

    let mut ready: VecDeque<usize> = (0..edges.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        for &consumer in &consumers[idx] {
            pending[consumer] -= 1;
            if pending[consumer] == 0 {
                ready.push_back(consumer);
            }
        }
    }

    (order.len() == edges.len()).then_some(order)
}

fn build_kind(
    name: &str,
    kind: &LayerKindDescription,
    widths: &[usize],
) -> Result<(LayerKind, usize)> {
    let invalid = |msg: String| ModelError::InvalidGraph(format!("layer '{}': {}", name, msg));
    let single_input = || -> Result<usize> {
        match widths {
            [width] => Ok(*width),
            _ => Err(invalid(format!("expects one input, got {}", widths.len()))),
        }
    };
    let parse_quantizer = |text: &str| -> Result<Quantizer> {
        text.parse().map_err(|source| ModelError::UnsupportedQuantizer {
            layer: name.to_string(),
            source,
        })
    };

    let built = match kind {
        LayerKindDescription::Input { features } => {
            if !widths.is_empty() {
                return Err(invalid("input layer cannot have inputs".to_string()));
            }
            if *features == 0 {
                return Err(invalid("input layer needs at least one feature".to_string()));
            }
            (LayerKind::Input, *features)
        }
        LayerKindDescription::Dense {
            units,
            weights,
            bias,
            kernel_quantizer,
            bias_quantizer,
        } => {
            let in_features = single_input()?;
            if *units == 0 {
                return Err(invalid("dense layer needs at least one unit".to_string()));
            }
            if weights.len() != units * in_features {
                return Err(invalid(format!(
                    "weights hold {} values, expected {} x {}",
                    weights.len(),
                    units,
                    in_features
                )));
            }
            let bias = match bias {
                Some(b) if b.len() != *units => {
                    return Err(invalid(format!(
                        "bias holds {} values, expected {}",
                        b.len(),
                        units
                    )))
                }
                Some(b) => b.clone(),
                None => vec![0.0; *units],
            };

            let kind = LayerKind::Dense {
                in_features,
                weights: weights.clone(),
                bias,
                kernel_quantizer: kernel_quantizer.as_deref().map(parse_quantizer).transpose()?,
                bias_quantizer: bias_quantizer.as_deref().map(parse_quantizer).transpose()?,
            };
            (kind, *units)
        }
        LayerKindDescription::BatchNormalization {
            gamma,
            beta,
            mean,
            variance,
            epsilon,
        } => {
            let features = single_input()?;
            for (label, values) in [
                ("gamma", gamma),
                ("beta", beta),
                ("mean", mean),
                ("variance", variance),
            ] {
                if values.len() != features {
                    return Err(invalid(format!(
                        "{} holds {} values, expected {}",
                        label,
                        values.len(),
                        features
                    )));
                }
            }

            let mut scale = Vec::with_capacity(features);
            let mut shift = Vec::with_capacity(features);
            for c in 0..features {
                let denominator = variance[c] + epsilon;
                if denominator <= 0.0 {
                    return Err(invalid(format!(
                        "variance + epsilon must be positive, got {}",
                        denominator
                    )));
                }
                let s = gamma[c] / denominator.sqrt();
                scale.push(s);
                shift.push(beta[c] - mean[c] * s);
            }
            (LayerKind::BatchNormalization { scale, shift }, features)
        }
        LayerKindDescription::Activation { function } => {
            let features = single_input()?;
            let kind = match function.as_str() {
                "linear" => LayerKind::Activation {
                    function: ActivationFunction::Linear,
                },
                "relu" => LayerKind::Activation {
                    function: ActivationFunction::Relu,
                },
                "softmax" => LayerKind::Softmax,
                text => {
                    let quantizer = parse_quantizer(text)?;
                    quantizer
                        .check_activation()
                        .map_err(|source| ModelError::UnsupportedQuantizer {
                            layer: name.to_string(),
                            source,
                        })?;
                    LayerKind::Activation {
                        function: ActivationFunction::Quantized(quantizer),
                    }
                }
            };
            (kind, features)
        }
        LayerKindDescription::Softmax => (LayerKind::Softmax, single_input()?),
        LayerKindDescription::Add => {
            if widths.len() < 2 {
                return Err(invalid("add needs at least two inputs".to_string()));
            }
            if widths.iter().any(|&w| w != widths[0]) {
                return Err(invalid(format!("add inputs differ in width: {:?}", widths)));
            }
            (LayerKind::Add, widths[0])
        }
        LayerKindDescription::Concatenate => {
            if widths.len() < 2 {
                return Err(invalid("concatenate needs at least two inputs".to_string()));
            }
            (LayerKind::Concatenate, widths.iter().sum())
        }
    };

    Ok(built)
}
