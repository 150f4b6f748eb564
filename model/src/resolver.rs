use fixed::{NumericType, RoundingMode, SaturationMode, MAX_TOTAL_BITS};
use log::{debug, warn};
use quantizers::Encoding;

use crate::config::{Granularity, LayerOverrides, PrecisionConfig};
use crate::error::{ModelError, Result};
use crate::graph::Graph;
use crate::layer::{ActivationFunction, Layer, LayerKind, Port, Ports, DEFAULT_TABLE_SIZE};

/// `fixed<18,8>`: covers softmax exponent arguments down to -128.
pub fn default_exp_table() -> Result<NumericType> {
    Ok(NumericType::fixed(18, 8)?)
}

/// `fixed<18,4>`: inverse of sums up to 8 without saturating at the small end.
pub fn default_inv_table() -> Result<NumericType> {
    Ok(NumericType::fixed(18, 4)?)
}

/// Assigns a numeric type to every required port of every layer.
///
/// Per layer, in topological order: quantizer-derived types, then defaults for
/// whatever is still missing, then model-wide overrides, then per-layer overrides.
/// Accumulators are inferred from the already final operand types and only then
/// receive their overrides.
pub fn resolve(graph: &mut Graph, config: &PrecisionConfig) -> Result<()> {
    check_layer_names(graph, config)?;

    for position in 0..graph.order().len() {
        let idx = graph.order()[position];
        let layer = graph.layer(idx);

        let mut inputs = Vec::with_capacity(layer.inputs().len());
        for &input in layer.inputs() {
            let upstream = graph.layer(input);
            let ty = upstream
                .ports()
                .result
                .ok_or_else(|| ModelError::UnresolvedType {
                    layer: upstream.name().to_string(),
                    port: Port::Result.to_string(),
                })?;
            inputs.push(effective_type(ty, upstream.output_encoding())?);
        }

        let overrides = config.layer(layer.name());
        let (ports, table_size) = resolve_layer(layer, &inputs, config, overrides)?;

        debug!(
            "Resolved {} '{}': result {}, accum {}",
            layer.class_name(),
            layer.name(),
            display(ports.result),
            display(ports.accum)
        );

        let layer = &mut graph.layers_mut()[idx];
        *layer.ports_mut() = ports;
        layer.set_table_size(table_size);
    }

    Ok(())
}

fn resolve_layer(
    layer: &Layer,
    inputs: &[NumericType],
    config: &PrecisionConfig,
    overrides: Option<&LayerOverrides>,
) -> Result<(Ports, usize)> {
    let required = layer.required_ports();
    let (operands, accum): (Vec<Port>, Vec<Port>) =
        required.iter().copied().partition(|&port| port != Port::Accum);

    let mut ports = derive_ports(layer)?;
    fill_defaults(&mut ports, &operands, config.default_type)?;
    apply_overrides(&mut ports, &config.model, &operands)?;
    if let Some(overrides) = overrides {
        apply_overrides(&mut ports, overrides, &operands)?;
    }

    if !accum.is_empty() {
        ports.accum = infer_accumulator(layer, &ports, inputs)?;
        apply_overrides(&mut ports, &config.model, &accum)?;
        if let Some(overrides) = overrides {
            apply_overrides(&mut ports, overrides, &accum)?;
        }
    }

    let table_size = overrides
        .and_then(LayerOverrides::table_size)
        .or(config.model.table_size())
        .unwrap_or(DEFAULT_TABLE_SIZE);

    Ok((ports, table_size))
}

/// Types implied by the layer's own quantizers, nothing else.
pub fn derive_ports(layer: &Layer) -> Result<Ports> {
    let wrap = |layer: &Layer, source| ModelError::UnsupportedQuantizer {
        layer: layer.name().to_string(),
        source,
    };

    let mut ports = Ports::default();
    match layer.kind() {
        LayerKind::Dense {
            kernel_quantizer,
            bias_quantizer,
            ..
        } => {
            if let Some(q) = kernel_quantizer {
                ports.weight = Some(q.numeric_type().map_err(|e| wrap(layer, e))?);
            }
            if let Some(q) = bias_quantizer {
                ports.bias = Some(q.numeric_type().map_err(|e| wrap(layer, e))?);
            }
        }
        LayerKind::Activation {
            function: ActivationFunction::Quantized(q),
        } => {
            ports.result = Some(q.numeric_type().map_err(|e| wrap(layer, e))?);
        }
        _ => {}
    }
    Ok(ports)
}

fn fill_defaults(ports: &mut Ports, required: &[Port], default_type: NumericType) -> Result<()> {
    for &port in required {
        if ports.get(port).is_some() {
            continue;
        }
        let ty = match port {
            Port::ExpTable => default_exp_table()?,
            Port::InvTable => default_inv_table()?,
            _ => default_type,
        };
        ports.set(port, Some(ty));
    }
    Ok(())
}

/// Merges one scope's overrides onto `ports`, restricted to `allowed`.
pub fn apply_overrides(ports: &mut Ports, overrides: &LayerOverrides, allowed: &[Port]) -> Result<()> {
    for &port in allowed {
        let Some(over) = overrides.port(port) else {
            continue;
        };
        let merged = match ports.get(port) {
            Some(base) => over.apply(base)?,
            None => over.as_type().ok_or_else(|| {
                ModelError::InvalidConfig(format!(
                    "partial override of {} has no type to merge onto",
                    port
                ))
            })?,
        };
        ports.set(port, Some(merged));
    }
    Ok(())
}

/// Accumulator wide enough that the reduction cannot overflow.
///
/// Products are exact: fractional bits add, integer bits add (an unsigned operand
/// paired with a signed one needs a sign bit of its own), and every doubling of
/// the term count adds one more integer bit.
pub fn infer_accumulator(
    layer: &Layer,
    ports: &Ports,
    inputs: &[NumericType],
) -> Result<Option<NumericType>> {
    let operand = |port: Port| -> Result<NumericType> {
        ports.get(port).ok_or_else(|| ModelError::UnresolvedType {
            layer: layer.name().to_string(),
            port: port.to_string(),
        })
    };
    let first_input = || -> Result<NumericType> {
        inputs.first().copied().ok_or_else(|| {
            ModelError::InvalidGraph(format!("layer '{}' has no input", layer.name()))
        })
    };

    let wide = match layer.kind() {
        LayerKind::Dense {
            in_features,
            kernel_quantizer,
            ..
        } => {
            let encoding = kernel_quantizer.map_or(Encoding::Direct, |q| q.encoding());
            let weight = effective_type(operand(Port::Weight)?, encoding)?;
            let product = Shape::product(first_input()?, weight);
            product.widen(ceil_log2(*in_features))
        }
        LayerKind::BatchNormalization { .. } => {
            Shape::product(first_input()?, operand(Port::Scale)?)
        }
        LayerKind::Add => {
            let any_signed = inputs.iter().any(NumericType::is_signed);
            let integer = inputs
                .iter()
                .map(|t| t.integer_bits() + (any_signed && !t.is_signed()) as i32)
                .max()
                .unwrap_or(0);
            let frac = inputs.iter().map(NumericType::fractional_bits).max().unwrap_or(0);
            Shape {
                integer,
                frac,
                signed: any_signed,
            }
            .widen(ceil_log2(inputs.len()))
        }
        LayerKind::Softmax => {
            Shape::of(operand(Port::ExpTable)?).widen(ceil_log2(layer.features()))
        }
        _ => return Ok(None),
    };

    wide.into_type(layer.name()).map(Some)
}

// Width bookkeeping before a type is committed.
#[derive(Debug, Clone, Copy)]
struct Shape {
    integer: i32,
    frac: i32,
    signed: bool,
}

impl Shape {
    fn of(ty: NumericType) -> Self {
        Self {
            integer: ty.integer_bits(),
            frac: ty.fractional_bits(),
            signed: ty.is_signed(),
        }
    }

    fn product(a: NumericType, b: NumericType) -> Self {
        let signed = a.is_signed() || b.is_signed();
        let sign_bit = |t: NumericType| (signed && !t.is_signed()) as i32;
        Self {
            integer: a.integer_bits() + sign_bit(a) + b.integer_bits() + sign_bit(b),
            frac: a.fractional_bits() + b.fractional_bits(),
            signed,
        }
    }

    fn widen(self, extra: i32) -> Self {
        Self {
            integer: self.integer + extra,
            ..self
        }
    }

    fn into_type(self, layer: &str) -> Result<NumericType> {
        let mut frac = self.frac;
        let mut total = self.integer + frac;
        if total > MAX_TOTAL_BITS as i32 {
            warn!(
                "Accumulator of '{}' needs {} bits, capping at {} by dropping {} fractional bits",
                layer,
                total,
                MAX_TOTAL_BITS,
                total - MAX_TOTAL_BITS as i32
            );
            frac -= total - MAX_TOTAL_BITS as i32;
            total = MAX_TOTAL_BITS as i32;
        }
        let total = total.max(1) as u32;

        let ty = NumericType::new(total, total as i32 - frac, self.signed)?;
        Ok(ty.with_modes(RoundingMode::Truncate, SaturationMode::Wrap))
    }
}

/// XNOR codes take part in arithmetic as -1/+1, which needs a signed 2-bit type.
pub fn effective_type(ty: NumericType, encoding: Encoding) -> Result<NumericType> {
    match encoding {
        Encoding::Direct => Ok(ty),
        Encoding::Xnor => Ok(NumericType::integer(2, true)?),
    }
}

fn ceil_log2(n: usize) -> i32 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as i32
    }
}

fn check_layer_names(graph: &Graph, config: &PrecisionConfig) -> Result<()> {
    let mut missing: Vec<&str> = config
        .layers
        .keys()
        .map(String::as_str)
        .filter(|name| graph.find(name).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    Err(ModelError::ConfigurationConflict(format!(
        "configuration names layers not in the graph: {}",
        missing.join(", ")
    )))
}

fn display(ty: Option<NumericType>) -> String {
    ty.map_or_else(|| "-".to_string(), |t| t.to_string())
}

/// Starting configuration in the spirit of the training library's exporter.
///
/// `Model` granularity yields only the global default; `Name` granularity spells
/// out every layer's ports (quantizer-derived where available, defaults otherwise).
pub fn config_from_graph(graph: &Graph, granularity: Granularity) -> Result<PrecisionConfig> {
    let mut config = PrecisionConfig::default();
    if granularity == Granularity::Model {
        return Ok(config);
    }

    for layer in graph.layers() {
        let mut ports = derive_ports(layer)?;
        let required: Vec<Port> = layer
            .required_ports()
            .into_iter()
            .filter(|&p| p != Port::Accum)
            .collect();
        fill_defaults(&mut ports, &required, config.default_type)?;

        let entry = config.layer_mut(layer.name());
        for port in required {
            if let Some(ty) = ports.get(port) {
                entry.set_type(port, ty);
            }
        }
        if matches!(layer.kind(), LayerKind::Softmax) {
            entry.set_table_size(DEFAULT_TABLE_SIZE)?;
        }
    }

    Ok(config)
}
