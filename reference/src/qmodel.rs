use ahash::AHashMap;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module};
use log::debug;
use model::{LayerKindDescription, NetworkDescription};
use quantizers::Quantizer;

use crate::error::{ReferenceError, Result};
use crate::quantize;

/// Float simulation of a quantized network, the way the training library runs it.
///
/// Parameters are quantized once at construction; activations are quantized on the
/// fly. Everything is `f64` on the CPU.
pub struct QModel {
    nodes: Vec<Node>,
    output: usize,
    input_features: usize,
    device: Device,
}

struct Node {
    name: String,
    inputs: Vec<usize>,
    op: Op,
}

enum Op {
    Input,
    Dense(Linear),
    BatchNorm {
        gamma: Tensor,
        beta: Tensor,
        mean: Tensor,
        variance: Tensor,
        epsilon: f64,
    },
    Activation(Activation),
    Softmax,
    Add,
    Concatenate,
}

enum Activation {
    Linear,
    Relu,
    Quantized(Quantizer),
}

impl QModel {
    /// Layers must be listed so that every input precedes its consumers; the last
    /// layer is the model output.
    pub fn from_description(description: &NetworkDescription) -> Result<Self> {
        let device = Device::Cpu;
        let mut index: AHashMap<&str, usize> = AHashMap::new();
        let mut features: Vec<usize> = Vec::with_capacity(description.layers.len());
        let mut nodes = Vec::with_capacity(description.layers.len());
        let mut input_features = None;

        for layer in &description.layers {
            let invalid = |reason: String| {
                ReferenceError::InvalidNetwork(format!("layer '{}': {}", layer.name, reason))
            };
            if index.contains_key(layer.name.as_str()) {
                return Err(invalid("duplicate name".to_string()));
            }

            let inputs = layer
                .inputs
                .iter()
                .map(|name| {
                    index
                        .get(name.as_str())
                        .copied()
                        .ok_or_else(|| invalid(format!("input '{}' is not defined before it", name)))
                })
                .collect::<Result<Vec<_>>>()?;
            let is_input = matches!(layer.kind, LayerKindDescription::Input { .. });
            if inputs.is_empty() != is_input {
                return Err(invalid("wrong number of inputs".to_string()));
            }
            let width = inputs.first().map_or(0, |&i| features[i]);

            let quantizer = |spec: &str| -> Result<Quantizer> {
                spec.parse().map_err(|source| ReferenceError::Quantizer {
                    layer: layer.name.clone(),
                    source,
                })
            };

            let (op, out) = match &layer.kind {
                LayerKindDescription::Input { features } => {
                    if input_features.replace(*features).is_some() {
                        return Err(invalid("second input layer".to_string()));
                    }
                    (Op::Input, *features)
                }
                LayerKindDescription::Dense {
                    units,
                    weights,
                    bias,
                    kernel_quantizer,
                    bias_quantizer,
                } => {
                    if weights.len() != units * width {
                        return Err(invalid(format!(
                            "expected {} weights, got {}",
                            units * width,
                            weights.len()
                        )));
                    }
                    let mut weight = Tensor::from_vec(weights.clone(), (*units, width), &device)?;
                    if let Some(spec) = kernel_quantizer {
                        weight = quantize::parameters(&quantizer(spec)?, &weight)?;
                    }

                    let bias = bias.clone().unwrap_or_else(|| vec![0.0; *units]);
                    if bias.len() != *units {
                        return Err(invalid(format!("expected {} biases, got {}", units, bias.len())));
                    }
                    let mut bias = Tensor::from_vec(bias, (*units, 1), &device)?;
                    if let Some(spec) = bias_quantizer {
                        bias = quantize::parameters(&quantizer(spec)?, &bias)?;
                    }

                    (
                        Op::Dense(Linear::new(weight, Some(bias.flatten_all()?))),
                        *units,
                    )
                }
                LayerKindDescription::BatchNormalization {
                    gamma,
                    beta,
                    mean,
                    variance,
                    epsilon,
                } => {
                    let row = |values: &Vec<f64>| -> Result<Tensor> {
                        if values.len() != width {
                            return Err(invalid(format!(
                                "expected {} batch-norm parameters, got {}",
                                width,
                                values.len()
                            )));
                        }
                        Ok(Tensor::from_vec(values.clone(), (1, width), &device)?)
                    };
                    let op = Op::BatchNorm {
                        gamma: row(gamma)?,
                        beta: row(beta)?,
                        mean: row(mean)?,
                        variance: row(variance)?,
                        epsilon: *epsilon,
                    };
                    (op, width)
                }
                LayerKindDescription::Activation { function } => {
                    let op = match function.trim() {
                        "linear" => Op::Activation(Activation::Linear),
                        "relu" => Op::Activation(Activation::Relu),
                        "softmax" => Op::Softmax,
                        spec => {
                            let q = quantizer(spec)?;
                            q.check_activation().map_err(|source| ReferenceError::Quantizer {
                                layer: layer.name.clone(),
                                source,
                            })?;
                            Op::Activation(Activation::Quantized(q))
                        }
                    };
                    (op, width)
                }
                LayerKindDescription::Softmax => (Op::Softmax, width),
                LayerKindDescription::Add => {
                    if inputs.iter().any(|&i| features[i] != width) {
                        return Err(invalid("inputs differ in width".to_string()));
                    }
                    (Op::Add, width)
                }
                LayerKindDescription::Concatenate => {
                    (Op::Concatenate, inputs.iter().map(|&i| features[i]).sum())
                }
            };

            debug!("Reference layer '{}' with {} outputs", layer.name, out);
            index.insert(layer.name.as_str(), nodes.len());
            features.push(out);
            nodes.push(Node {
                name: layer.name.clone(),
                inputs,
                op,
            });
        }

        let input_features = input_features
            .ok_or_else(|| ReferenceError::InvalidNetwork("no input layer".to_string()))?;
        if nodes.is_empty() {
            return Err(ReferenceError::InvalidNetwork("no layers".to_string()));
        }

        Ok(Self {
            output: nodes.len() - 1,
            nodes,
            input_features,
            device,
        })
    }

    pub fn input_features(&self) -> usize {
        self.input_features
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name.as_str())
    }

    /// Runs a batch of rows and returns the output rows.
    pub fn predict<R: AsRef<[f64]>>(&self, batch: &[R]) -> Result<Vec<Vec<f64>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut data = Vec::with_capacity(batch.len() * self.input_features);
        for row in batch {
            let row = row.as_ref();
            if row.len() != self.input_features {
                return Err(ReferenceError::InvalidNetwork(format!(
                    "expected {} input features, got {}",
                    self.input_features,
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }

        let x = Tensor::from_vec(data, (batch.len(), self.input_features), &self.device)?;
        Ok(self.forward(&x)?.to_vec2::<f64>()?)
    }
}

impl Module for QModel {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let x = x.to_dtype(DType::F64)?;
        let mut values: Vec<Option<Tensor>> = vec![None; self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            let inputs = node
                .inputs
                .iter()
                .map(|&j| {
                    values[j]
                        .clone()
                        .ok_or_else(|| candle_core::Error::Msg(format!("'{}' ran before its input", node.name)))
                })
                .collect::<candle_core::Result<Vec<_>>>()?;

            let out = match &node.op {
                Op::Input => x.clone(),
                Op::Dense(linear) => inputs[0].apply(linear)?,
                Op::BatchNorm {
                    gamma,
                    beta,
                    mean,
                    variance,
                    epsilon,
                } => {
                    let deviation = variance.affine(1.0, *epsilon)?.sqrt()?;
                    inputs[0]
                        .broadcast_sub(mean)?
                        .broadcast_div(&deviation)?
                        .broadcast_mul(gamma)?
                        .broadcast_add(beta)?
                }
                Op::Activation(Activation::Linear) => inputs[0].clone(),
                Op::Activation(Activation::Relu) => inputs[0].relu()?,
                Op::Activation(Activation::Quantized(q)) => quantize::activation(q, &inputs[0])?,
                Op::Softmax => candle_nn::ops::softmax(&inputs[0], D::Minus1)?,
                Op::Add => {
                    let mut sum = inputs[0].clone();
                    for input in &inputs[1..] {
                        sum = sum.add(input)?;
                    }
                    sum
                }
                Op::Concatenate => Tensor::cat(&inputs, D::Minus1)?,
            };
            values[i] = Some(out);
        }

        values[self.output]
            .take()
            .ok_or_else(|| candle_core::Error::Msg("model produced no output".to_string()))
    }
}
