/// A network as handed over by the training side: layers in declaration order,
/// parameters as host floats and quantizers in their textual form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkDescription {
    pub layers: Vec<LayerDescription>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescription {
    pub name: String,
    /// Upstream layer names. Left empty, the layer follows the previously added one.
    pub inputs: Vec<String>,
    pub kind: LayerKindDescription,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKindDescription {
    Input {
        features: usize,
    },
    Dense {
        units: usize,
        /// Row-major `[units][input features]`.
        weights: Vec<f64>,
        bias: Option<Vec<f64>>,
        kernel_quantizer: Option<String>,
        bias_quantizer: Option<String>,
    },
    BatchNormalization {
        gamma: Vec<f64>,
        beta: Vec<f64>,
        mean: Vec<f64>,
        variance: Vec<f64>,
        epsilon: f64,
    },
    /// `linear`, `relu`, or a quantizer call such as `quantized_relu(4,0)`.
    Activation {
        function: String,
    },
    Softmax,
    Add,
    Concatenate,
}

impl NetworkDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer, wiring it to the previous layer when it names no inputs.
    pub fn push(&mut self, mut layer: LayerDescription) -> &mut Self {
        let needs_input = !matches!(layer.kind, LayerKindDescription::Input { .. });
        if needs_input && layer.inputs.is_empty() {
            if let Some(previous) = self.layers.last() {
                layer.inputs.push(previous.name.clone());
            }
        }
        self.layers.push(layer);
        self
    }

    pub fn with(mut self, layer: LayerDescription) -> Self {
        self.push(layer);
        self
    }
}

impl LayerDescription {
    fn new(name: &str, kind: LayerKindDescription) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            kind,
        }
    }

    pub fn input(name: &str, features: usize) -> Self {
        Self::new(name, LayerKindDescription::Input { features })
    }

    pub fn dense(name: &str, units: usize, weights: Vec<f64>, bias: Option<Vec<f64>>) -> Self {
        Self::new(
            name,
            LayerKindDescription::Dense {
                units,
                weights,
                bias,
                kernel_quantizer: None,
                bias_quantizer: None,
            },
        )
    }

    pub fn batch_norm(
        name: &str,
        gamma: Vec<f64>,
        beta: Vec<f64>,
        mean: Vec<f64>,
        variance: Vec<f64>,
        epsilon: f64,
    ) -> Self {
        Self::new(
            name,
            LayerKindDescription::BatchNormalization {
                gamma,
                beta,
                mean,
                variance,
                epsilon,
            },
        )
    }

    pub fn activation(name: &str, function: &str) -> Self {
        Self::new(
            name,
            LayerKindDescription::Activation {
                function: function.to_string(),
            },
        )
    }

    pub fn softmax(name: &str) -> Self {
        Self::new(name, LayerKindDescription::Softmax)
    }

    pub fn add(name: &str, inputs: &[&str]) -> Self {
        Self::new(name, LayerKindDescription::Add).with_inputs(inputs)
    }

    pub fn concatenate(name: &str, inputs: &[&str]) -> Self {
        Self::new(name, LayerKindDescription::Concatenate).with_inputs(inputs)
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Attaches kernel and bias quantizers to a dense layer; other kinds are left alone.
    pub fn with_quantizers(mut self, kernel: Option<&str>, bias: Option<&str>) -> Self {
        if let LayerKindDescription::Dense {
            kernel_quantizer,
            bias_quantizer,
            ..
        } = &mut self.kind
        {
            *kernel_quantizer = kernel.map(str::to_string);
            *bias_quantizer = bias.map(str::to_string);
        }
        self
    }
}
