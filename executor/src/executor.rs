use std::num::NonZeroUsize;

use fixed::{Fixed, NumericType};
use log::{debug, trace};
use model::{ActivationFunction, Graph, Layer, LayerKind, Port};
use quantizers::{ActivationKind, Encoding, Quantizer};
use rayon::prelude::*;

use crate::error::{ExecutorError, NumericFault, Result, Stage};
use crate::lut::{ExpTable, InvTable};
use crate::output::BatchOutput;

/// A compiled, immutable evaluation plan.
///
/// Parameters are already on their grids and lookup tables are built, so `predict`
/// only touches input data. The executor holds no mutable state and can be shared
/// across threads.
#[derive(Debug, Clone)]
pub struct Executor {
    steps: Vec<Step>,
    slots: usize,
    output: usize,
    input_features: usize,
    output_features: usize,
}

#[derive(Debug, Clone)]
struct Step {
    name: String,
    slot: usize,
    inputs: Vec<usize>,
    /// Per input: whether it arrives as XNOR codes that must become -1/+1.
    decode: Vec<bool>,
    op: Op,
}

#[derive(Debug, Clone)]
enum Op {
    Input {
        result: NumericType,
    },
    Dense(DenseOp),
    BatchNorm {
        scale: Vec<Fixed>,
        shift: Vec<Fixed>,
        accum: NumericType,
        result: NumericType,
    },
    Activation {
        function: Function,
        result: NumericType,
    },
    Softmax {
        exp: ExpTable,
        inv: InvTable,
        accum: NumericType,
        result: NumericType,
    },
    Add {
        accum: NumericType,
        result: NumericType,
    },
    Concatenate {
        result: NumericType,
    },
}

#[derive(Debug, Clone)]
struct DenseOp {
    in_features: usize,
    /// Row-major `[out][in]`, XNOR codes already decoded.
    weights: Vec<Fixed>,
    scales: Option<Vec<Fixed>>,
    bias: Vec<Fixed>,
    accum: NumericType,
    result: NumericType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Linear,
    Relu,
    /// `x >= 0` selects 1, otherwise 0 (XNOR) or -1 (bipolar).
    Binary { bipolar: bool },
    /// `|x| > threshold` keeps the sign, otherwise 0.
    Ternary { threshold: f64 },
}

/// Builds an executor from a fully resolved graph.
pub fn compile(graph: &Graph) -> Result<Executor> {
    if let Some((layer, port)) = graph.first_unresolved() {
        return Err(ExecutorError::UnresolvedType {
            layer: layer.name().to_string(),
            port: port.to_string(),
        });
    }

    let mut steps = Vec::with_capacity(graph.order().len());
    for &idx in graph.order() {
        let layer = graph.layer(idx);
        let decode = layer
            .inputs()
            .iter()
            .map(|&i| graph.layer(i).output_encoding() == Encoding::Xnor)
            .collect();
        let op = compile_op(graph, layer)?;
        debug!("Compiled {} '{}'", layer.class_name(), layer.name());

        steps.push(Step {
            name: layer.name().to_string(),
            slot: idx,
            inputs: layer.inputs().to_vec(),
            decode,
            op,
        });
    }

    Ok(Executor {
        steps,
        slots: graph.layers().len(),
        output: graph.output_index(),
        input_features: graph.input_features(),
        output_features: graph.output_features(),
    })
}

fn port(layer: &Layer, port: Port) -> Result<NumericType> {
    layer
        .ports()
        .get(port)
        .ok_or_else(|| ExecutorError::UnresolvedType {
            layer: layer.name().to_string(),
            port: port.to_string(),
        })
}

fn ensure_finite(layer: &Layer, parameter: &'static str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ExecutorError::NonFiniteParameter {
            layer: layer.name().to_string(),
            parameter,
        })
    }
}

fn snap(layer: &Layer, parameter: &'static str, values: &[f64], ty: NumericType) -> Result<Vec<Fixed>> {
    ensure_finite(layer, parameter, values)?;
    Ok(values
        .iter()
        .map(|&v| Fixed::from_f64(v, ty))
        .collect::<fixed::Result<Vec<_>>>()?)
}

fn quantizer_error(layer: &Layer) -> impl Fn(quantizers::QuantizerError) -> ExecutorError + '_ {
    move |source| ExecutorError::Quantizer {
        layer: layer.name().to_string(),
        source,
    }
}

fn compile_op(graph: &Graph, layer: &Layer) -> Result<Op> {
    let op = match layer.kind() {
        LayerKind::Input => Op::Input {
            result: port(layer, Port::Result)?,
        },
        LayerKind::Dense {
            in_features,
            weights,
            bias,
            kernel_quantizer,
            bias_quantizer,
        } => {
            let units = layer.features();
            let weight_ty = port(layer, Port::Weight)?;
            ensure_finite(layer, "weights", weights)?;

            let (weights, scales) = match kernel_quantizer {
                Some(q) => {
                    let tensor = q
                        .project_tensor(weights, units)
                        .map_err(quantizer_error(layer))?;
                    let mut codes = snap(layer, "weights", &tensor.codes, weight_ty)?;
                    if q.encoding() == Encoding::Xnor {
                        codes = codes
                            .into_iter()
                            .map(Fixed::decode_bipolar)
                            .collect::<fixed::Result<Vec<_>>>()?;
                    }
                    let scales = if layer.has_kernel_scale() {
                        Some(snap(layer, "scale", &tensor.scales, port(layer, Port::Scale)?)?)
                    } else {
                        None
                    };
                    (codes, scales)
                }
                None => (snap(layer, "weights", weights, weight_ty)?, None),
            };

            let bias_ty = port(layer, Port::Bias)?;
            ensure_finite(layer, "bias", bias)?;
            let bias = match bias_quantizer {
                Some(q) => {
                    let tensor = q
                        .project_tensor(bias, units)
                        .map_err(quantizer_error(layer))?;
                    snap(layer, "bias", &tensor.dequantize(), bias_ty)?
                }
                None => snap(layer, "bias", bias, bias_ty)?,
            };

            Op::Dense(DenseOp {
                in_features: *in_features,
                weights,
                scales,
                bias,
                accum: port(layer, Port::Accum)?,
                result: port(layer, Port::Result)?,
            })
        }
        LayerKind::BatchNormalization { scale, shift } => Op::BatchNorm {
            scale: snap(layer, "scale", scale, port(layer, Port::Scale)?)?,
            shift: snap(layer, "shift", shift, port(layer, Port::Bias)?)?,
            accum: port(layer, Port::Accum)?,
            result: port(layer, Port::Result)?,
        },
        LayerKind::Activation { function } => Op::Activation {
            function: match function {
                ActivationFunction::Linear => Function::Linear,
                ActivationFunction::Relu => Function::Relu,
                ActivationFunction::Quantized(q) => quantized_function(q),
            },
            result: port(layer, Port::Result)?,
        },
        LayerKind::Softmax => {
            let size = NonZeroUsize::new(layer.table_size()).ok_or_else(|| {
                ExecutorError::InvalidTableSize {
                    layer: layer.name().to_string(),
                    size: layer.table_size(),
                }
            })?;
            let upstream = graph.layer(layer.inputs()[0]);
            // Decoded XNOR codes are -1/+1, two integer bits
            let input_bits = match upstream.output_encoding() {
                Encoding::Xnor => 2,
                Encoding::Direct => port(upstream, Port::Result)?.integer_bits(),
            };
            Op::Softmax {
                exp: ExpTable::new(
                    size,
                    input_bits,
                    port(layer, Port::ExpTable)?,
                )?,
                inv: InvTable::new(
                    size,
                    layer.features() as f64,
                    port(layer, Port::InvTable)?,
                )?,
                accum: port(layer, Port::Accum)?,
                result: port(layer, Port::Result)?,
            }
        }
        LayerKind::Add => Op::Add {
            accum: port(layer, Port::Accum)?,
            result: port(layer, Port::Result)?,
        },
        LayerKind::Concatenate => Op::Concatenate {
            result: port(layer, Port::Result)?,
        },
    };
    Ok(op)
}

fn quantized_function(q: &Quantizer) -> Function {
    match (q.activation_kind(), q) {
        (ActivationKind::Linear, _) => Function::Linear,
        (ActivationKind::Relu, _) => Function::Relu,
        (ActivationKind::Threshold, Quantizer::Ternary(t)) => Function::Ternary {
            threshold: t.threshold(),
        },
        (ActivationKind::Threshold, Quantizer::Binary(b)) => Function::Binary {
            bipolar: !b.is_xnor,
        },
        (ActivationKind::Threshold, Quantizer::Uniform(_)) => Function::Binary { bipolar: false },
    }
}

// Tracks the stage of the layer being evaluated so a fault can report it.
struct Run<'a> {
    layer: &'a str,
    stage: Stage,
    history: Option<Vec<Stage>>,
}

impl<'a> Run<'a> {
    fn new(layer: &'a str, record: bool) -> Self {
        Self {
            layer,
            stage: Stage::Pending,
            history: record.then(|| vec![Stage::Pending]),
        }
    }

    fn enter(&mut self, stage: Stage) {
        trace!("'{}': {} -> {}", self.layer, self.stage, stage);
        self.stage = stage;
        if let Some(history) = &mut self.history {
            history.push(stage);
        }
    }

    fn fault(&self, reason: impl ToString) -> NumericFault {
        NumericFault {
            layer: self.layer.to_string(),
            stage: self.stage,
            reason: reason.to_string(),
        }
    }
}

type StepResult<T> = std::result::Result<T, NumericFault>;

impl Executor {
    pub fn input_features(&self) -> usize {
        self.input_features
    }

    pub fn output_features(&self) -> usize {
        self.output_features
    }

    /// Evaluates every row of `batch` in parallel. A faulting row does not affect the others.
    pub fn predict<R: AsRef<[f64]> + Sync>(&self, batch: &[R]) -> BatchOutput {
        let rows = batch
            .par_iter()
            .map(|row| self.predict_row(row.as_ref()))
            .collect();
        BatchOutput::new(rows)
    }

    pub fn predict_row(&self, row: &[f64]) -> StepResult<Vec<f64>> {
        self.evaluate(row, None)
    }

    /// Stages every layer passed through while running `row`, in evaluation order.
    ///
    /// Each history starts at `Pending`; layers after a fault never leave it.
    pub fn trace(&self, row: &[f64]) -> Vec<(&str, Vec<Stage>)> {
        let mut histories = vec![vec![Stage::Pending]; self.steps.len()];
        // The outcome itself is visible through the Failed entry.
        let _ = self.evaluate(row, Some(histories.as_mut_slice()));
        self.steps
            .iter()
            .zip(histories)
            .map(|(step, history)| (step.name.as_str(), history))
            .collect()
    }

    fn evaluate(&self, row: &[f64], mut histories: Option<&mut [Vec<Stage>]>) -> StepResult<Vec<f64>> {
        let mut values: Vec<Vec<Fixed>> = vec![Vec::new(); self.slots];

        for (position, step) in self.steps.iter().enumerate() {
            let mut run = Run::new(&step.name, histories.is_some());
            let outcome = self.run_step(step, row, &values, &mut run);
            run.enter(if outcome.is_ok() { Stage::Done } else { Stage::Failed });

            if let (Some(histories), Some(history)) = (histories.as_deref_mut(), run.history) {
                histories[position] = history;
            }
            values[step.slot] = outcome?;
        }

        Ok(values[self.output].iter().map(|v| v.to_f64()).collect())
    }

    fn run_step(
        &self,
        step: &Step,
        row: &[f64],
        values: &[Vec<Fixed>],
        run: &mut Run,
    ) -> StepResult<Vec<Fixed>> {
        run.enter(Stage::Quantizing);

        let mut inputs: Vec<Vec<Fixed>> = Vec::with_capacity(step.inputs.len());
        for (&slot, &decode) in step.inputs.iter().zip(&step.decode) {
            let source = &values[slot];
            if decode {
                let decoded = source
                    .iter()
                    .map(|v| v.decode_bipolar())
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))?;
                inputs.push(decoded);
            } else {
                inputs.push(source.clone());
            }
        }
        let first = inputs.first().map(Vec::as_slice).unwrap_or(&[]);

        match &step.op {
            Op::Input { result } => {
                if row.len() != self.input_features {
                    return Err(run.fault(format!(
                        "expected {} input features, got {}",
                        self.input_features,
                        row.len()
                    )));
                }
                let projected = row
                    .iter()
                    .map(|&x| Fixed::from_f64(x, *result))
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))?;
                run.enter(Stage::Accumulating);
                run.enter(Stage::Narrowing);
                Ok(projected)
            }
            Op::Dense(dense) => {
                run.enter(Stage::Accumulating);
                let mut sums = Vec::with_capacity(dense.bias.len());
                for (o, weights) in dense.weights.chunks(dense.in_features.max(1)).enumerate() {
                    let mut acc = Fixed::ZERO.narrow(dense.accum);
                    for (x, w) in first.iter().zip(weights) {
                        let product = x.checked_mul(*w).map_err(|e| run.fault(e))?;
                        acc = acc
                            .checked_add(product.narrow(dense.accum))
                            .map_err(|e| run.fault(e))?
                            .narrow(dense.accum);
                    }
                    if let Some(scales) = &dense.scales {
                        acc = acc.checked_mul(scales[o]).map_err(|e| run.fault(e))?;
                    }
                    sums.push(acc);
                }

                run.enter(Stage::Narrowing);
                sums.into_iter()
                    .zip(&dense.bias)
                    .map(|(acc, b)| Ok(acc.checked_add(*b)?.narrow(dense.result)))
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))
            }
            Op::BatchNorm {
                scale,
                shift,
                accum,
                result,
            } => {
                run.enter(Stage::Accumulating);
                let scaled = first
                    .iter()
                    .zip(scale)
                    .map(|(x, s)| Ok(x.checked_mul(*s)?.narrow(*accum)))
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))?;

                run.enter(Stage::Narrowing);
                scaled
                    .into_iter()
                    .zip(shift)
                    .map(|(v, b)| Ok(v.checked_add(*b)?.narrow(*result)))
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))
            }
            Op::Activation { function, result } => {
                run.enter(Stage::Accumulating);
                let activated: Vec<Fixed> = first.iter().map(|x| activate(*function, *x)).collect();
                run.enter(Stage::Narrowing);
                Ok(activated.into_iter().map(|v| v.narrow(*result)).collect())
            }
            Op::Softmax {
                exp,
                inv,
                accum,
                result,
            } => {
                let max = first.iter().copied().reduce(|a, b| {
                    if b.cmp_value(&a).is_gt() {
                        b
                    } else {
                        a
                    }
                });
                let exps = match max {
                    Some(max) => first
                        .iter()
                        .map(|x| Ok(exp.lookup(x.checked_sub(max)?)))
                        .collect::<fixed::Result<Vec<_>>>()
                        .map_err(|e| run.fault(e))?,
                    None => Vec::new(),
                };

                run.enter(Stage::Accumulating);
                let mut sum = Fixed::ZERO.narrow(*accum);
                for e in &exps {
                    sum = sum.checked_add(*e).map_err(|err| run.fault(err))?.narrow(*accum);
                }
                let inverse = inv.lookup(sum);

                run.enter(Stage::Narrowing);
                exps.iter()
                    .map(|e| Ok(e.checked_mul(inverse)?.narrow(*result)))
                    .collect::<fixed::Result<Vec<_>>>()
                    .map_err(|e| run.fault(e))
            }
            Op::Add { accum, result } => {
                run.enter(Stage::Accumulating);
                let mut sums = vec![Fixed::ZERO.narrow(*accum); first.len()];
                for input in &inputs {
                    for (acc, x) in sums.iter_mut().zip(input) {
                        *acc = acc.checked_add(*x).map_err(|e| run.fault(e))?.narrow(*accum);
                    }
                }
                run.enter(Stage::Narrowing);
                Ok(sums.into_iter().map(|v| v.narrow(*result)).collect())
            }
            Op::Concatenate { result } => {
                run.enter(Stage::Accumulating);
                let joined: Vec<Fixed> = inputs.iter().flatten().copied().collect();
                run.enter(Stage::Narrowing);
                Ok(joined.into_iter().map(|v| v.narrow(*result)).collect())
            }
        }
    }
}

fn activate(function: Function, x: Fixed) -> Fixed {
    let one = Fixed::from_raw(1, 0);
    match function {
        Function::Linear => x,
        Function::Relu => {
            if x.is_negative() {
                Fixed::ZERO
            } else {
                x
            }
        }
        Function::Binary { bipolar } => {
            if !x.is_negative() {
                one
            } else if bipolar {
                Fixed::from_raw(-1, 0)
            } else {
                Fixed::ZERO
            }
        }
        Function::Ternary { threshold } => {
            let v = x.to_f64();
            if v > threshold {
                one
            } else if v < -threshold {
                Fixed::from_raw(-1, 0)
            } else {
                Fixed::ZERO
            }
        }
    }
}
