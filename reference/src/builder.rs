use candle_nn::{linear, VarBuilder};
use model::{LayerDescription, NetworkDescription};

use crate::error::Result;

/// A fully connected stack whose parameters come from candle's initialisers.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseStack {
    pub inputs: usize,
    pub hidden: Vec<usize>,
    pub outputs: usize,
    pub kernel_quantizer: Option<String>,
    pub bias_quantizer: Option<String>,
    /// Applied after every hidden layer.
    pub activation: String,
    pub softmax: bool,
}

impl DenseStack {
    pub fn new(inputs: usize, hidden: &[usize], outputs: usize) -> Self {
        Self {
            inputs,
            hidden: hidden.to_vec(),
            outputs,
            kernel_quantizer: None,
            bias_quantizer: None,
            activation: "relu".to_string(),
            softmax: false,
        }
    }

    pub fn with_quantizers(mut self, kernel: &str, bias: &str) -> Self {
        self.kernel_quantizer = Some(kernel.to_string());
        self.bias_quantizer = Some(bias.to_string());
        self
    }

    pub fn with_activation(mut self, activation: &str) -> Self {
        self.activation = activation.to_string();
        self
    }

    pub fn with_softmax(mut self) -> Self {
        self.softmax = true;
        self
    }

    /// Samples parameters through `vs` and emits the network description.
    ///
    /// Layers are named `input`, `dense1..`, `act1..`, `output` and `softmax`.
    pub fn build(&self, vs: &VarBuilder) -> Result<NetworkDescription> {
        let mut description = NetworkDescription::new();
        description.push(LayerDescription::input("input", self.inputs));

        let mut width = self.inputs;
        for (i, &units) in self.hidden.iter().enumerate() {
            let name = format!("dense{}", i + 1);
            description.push(self.dense(vs, &name, width, units)?);
            description.push(LayerDescription::activation(
                &format!("act{}", i + 1),
                &self.activation,
            ));
            width = units;
        }

        description.push(self.dense(vs, "output", width, self.outputs)?);
        if self.softmax {
            description.push(LayerDescription::softmax("softmax"));
        }

        Ok(description)
    }

    fn dense(&self, vs: &VarBuilder, name: &str, in_dim: usize, out_dim: usize) -> Result<LayerDescription> {
        let layer = linear(in_dim, out_dim, vs.pp(name))?;
        let weights = layer.weight().flatten_all()?.to_vec1::<f64>()?;
        let bias = match layer.bias() {
            Some(bias) => Some(bias.to_vec1::<f64>()?),
            None => None,
        };

        Ok(LayerDescription::dense(name, out_dim, weights, bias)
            .with_quantizers(self.kernel_quantizer.as_deref(), self.bias_quantizer.as_deref()))
    }
}
