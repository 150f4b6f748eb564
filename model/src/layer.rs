use std::fmt;
use std::str::FromStr;

use fixed::NumericType;
use quantizers::{Encoding, Quantizer};

use crate::error::{ModelError, Result};

pub const DEFAULT_TABLE_SIZE: usize = 1024;

/// A typed slot on a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    Weight,
    Bias,
    Scale,
    Accum,
    Result,
    ExpTable,
    InvTable,
}

impl Port {
    pub const ALL: [Port; 7] = [
        Port::Weight,
        Port::Bias,
        Port::Scale,
        Port::Accum,
        Port::Result,
        Port::ExpTable,
        Port::InvTable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Port::Weight => "weight",
            Port::Bias => "bias",
            Port::Scale => "scale",
            Port::Accum => "accum",
            Port::Result => "result",
            Port::ExpTable => "exp_table",
            Port::InvTable => "inv_table",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Port {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let port = match s {
            "weight" => Port::Weight,
            "bias" => Port::Bias,
            "scale" => Port::Scale,
            "accum" => Port::Accum,
            "result" => Port::Result,
            "exp_table" | "exp_table_t" => Port::ExpTable,
            "inv_table" | "inv_table_t" => Port::InvTable,
            _ => return Err(ModelError::InvalidConfig(format!("unknown port '{}'", s))),
        };
        Ok(port)
    }
}

/// Numeric types of a layer's slots; `None` until resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ports {
    pub weight: Option<NumericType>,
    pub bias: Option<NumericType>,
    pub scale: Option<NumericType>,
    pub accum: Option<NumericType>,
    pub result: Option<NumericType>,
    pub exp_table: Option<NumericType>,
    pub inv_table: Option<NumericType>,
}

impl Ports {
    pub fn get(&self, port: Port) -> Option<NumericType> {
        match port {
            Port::Weight => self.weight,
            Port::Bias => self.bias,
            Port::Scale => self.scale,
            Port::Accum => self.accum,
            Port::Result => self.result,
            Port::ExpTable => self.exp_table,
            Port::InvTable => self.inv_table,
        }
    }

    pub fn set(&mut self, port: Port, ty: Option<NumericType>) {
        let slot = match port {
            Port::Weight => &mut self.weight,
            Port::Bias => &mut self.bias,
            Port::Scale => &mut self.scale,
            Port::Accum => &mut self.accum,
            Port::Result => &mut self.result,
            Port::ExpTable => &mut self.exp_table,
            Port::InvTable => &mut self.inv_table,
        };
        *slot = ty;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationFunction {
    Linear,
    Relu,
    Quantized(Quantizer),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Input,
    Dense {
        in_features: usize,
        /// Row-major `[out][in]`.
        weights: Vec<f64>,
        /// Zeros when the description had no bias.
        bias: Vec<f64>,
        kernel_quantizer: Option<Quantizer>,
        bias_quantizer: Option<Quantizer>,
    },
    /// Batch normalization folded into `y = x * scale + shift` per channel.
    BatchNormalization { scale: Vec<f64>, shift: Vec<f64> },
    Activation { function: ActivationFunction },
    Softmax,
    Add,
    Concatenate,
}

/// A node of the graph. Topology and parameters are fixed at construction;
/// only the port types and table size change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    inputs: Vec<usize>,
    features: usize,
    ports: Ports,
    table_size: usize,
}

impl Layer {
    pub(crate) fn new(name: String, kind: LayerKind, inputs: Vec<usize>, features: usize) -> Self {
        Self {
            name,
            kind,
            inputs,
            features,
            ports: Ports::default(),
            table_size: DEFAULT_TABLE_SIZE,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Indices of upstream layers in the graph.
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    /// Output width.
    pub fn features(&self) -> usize {
        self.features
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn set_table_size(&mut self, table_size: usize) {
        self.table_size = table_size;
    }

    /// The training library's class name, used for matching in configuration.
    pub fn class_name(&self) -> &'static str {
        match self.kind {
            LayerKind::Input => "InputLayer",
            LayerKind::Dense { .. } => "Dense",
            LayerKind::BatchNormalization { .. } => "BatchNormalization",
            LayerKind::Activation { .. } => "Activation",
            LayerKind::Softmax => "Softmax",
            LayerKind::Add => "Add",
            LayerKind::Concatenate => "Concatenate",
        }
    }

    /// True for a dense layer whose kernel codes carry a scale other than 1.
    pub fn has_kernel_scale(&self) -> bool {
        matches!(
            &self.kind,
            LayerKind::Dense { kernel_quantizer: Some(q), .. } if !q.alpha().is_unit()
        )
    }

    /// Ports that must hold a type before the layer can run.
    pub fn required_ports(&self) -> Vec<Port> {
        match self.kind {
            LayerKind::Input | LayerKind::Activation { .. } | LayerKind::Concatenate => {
                vec![Port::Result]
            }
            LayerKind::Dense { .. } => {
                let mut ports = vec![Port::Weight, Port::Bias, Port::Accum, Port::Result];
                if self.has_kernel_scale() {
                    ports.push(Port::Scale);
                }
                ports
            }
            LayerKind::BatchNormalization { .. } => {
                vec![Port::Scale, Port::Bias, Port::Accum, Port::Result]
            }
            LayerKind::Softmax => vec![Port::ExpTable, Port::InvTable, Port::Accum, Port::Result],
            LayerKind::Add => vec![Port::Accum, Port::Result],
        }
    }

    /// First required port without a type, if any.
    pub fn unresolved_port(&self) -> Option<Port> {
        self.required_ports()
            .into_iter()
            .find(|&port| self.ports.get(port).is_none())
    }

    /// How the layer's output codes are to be read by its consumers.
    pub fn output_encoding(&self) -> Encoding {
        match &self.kind {
            LayerKind::Activation {
                function: ActivationFunction::Quantized(q),
            } => q.encoding(),
            _ => Encoding::Direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_names_roundtrip() {
        for port in Port::ALL {
            assert_eq!(port.name().parse::<Port>().unwrap(), port);
        }
        assert_eq!("exp_table_t".parse::<Port>().unwrap(), Port::ExpTable);
        assert!("weights".parse::<Port>().is_err());
    }

    #[test]
    fn test_ports_get_set() {
        let mut ports = Ports::default();
        let ty = NumericType::fixed(8, 3).unwrap();
        for port in Port::ALL {
            assert_eq!(ports.get(port), None);
            ports.set(port, Some(ty));
            assert_eq!(ports.get(port), Some(ty));
        }
    }

    #[test]
    fn test_required_ports_and_resolution() {
        let kernel: Quantizer = "ternary(alpha='auto')".parse().unwrap();
        let mut dense = Layer::new(
            "d".to_string(),
            LayerKind::Dense {
                in_features: 1,
                weights: vec![0.5],
                bias: vec![0.0],
                kernel_quantizer: Some(kernel),
                bias_quantizer: None,
            },
            vec![0],
            1,
        );
        assert!(dense.has_kernel_scale());
        assert!(dense.required_ports().contains(&Port::Scale));
        assert_eq!(dense.unresolved_port(), Some(Port::Weight));

        let ty = NumericType::fixed(16, 6).unwrap();
        for port in dense.required_ports() {
            dense.ports_mut().set(port, Some(ty));
        }
        assert_eq!(dense.unresolved_port(), None);
    }

    #[test]
    fn test_output_encoding() {
        let binary: Quantizer = "binary".parse().unwrap();
        let layer = Layer::new(
            "a".to_string(),
            LayerKind::Activation {
                function: ActivationFunction::Quantized(binary),
            },
            vec![0],
            4,
        );
        assert_eq!(layer.output_encoding(), Encoding::Xnor);
        assert_eq!(layer.class_name(), "Activation");
    }
}
