use std::fmt;
use std::str::FromStr;

use fixed::NumericType;

use crate::binary::Binary;
use crate::error::{QuantizerError, Result};
use crate::spec::{QuantizerSpec, SpecValue};
use crate::ternary::Ternary;
use crate::uniform::Uniform;

/// Scale applied on top of a quantizer's codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Alpha {
    Fixed(f64),
    /// One scale per output channel, derived from the tensor itself.
    Auto,
}

impl Default for Alpha {
    fn default() -> Self {
        Alpha::Fixed(1.0)
    }
}

impl Alpha {
    pub fn is_unit(&self) -> bool {
        *self == Alpha::Fixed(1.0)
    }
}

impl fmt::Display for Alpha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alpha::Fixed(a) => write!(f, "{}", a),
            Alpha::Auto => write!(f, "'auto'"),
        }
    }
}

/// How a quantizer behaves when used as an activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    Linear,
    Relu,
    Threshold,
}

/// How codes map to values: directly, or `{0, 1}` standing for `{-1, +1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Direct,
    Xnor,
}

/// Everything the resolver needs to know about a quantizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub numeric_type: NumericType,
    pub activation: ActivationKind,
    pub encoding: Encoding,
}

/// A tensor projected onto a quantizer grid.
///
/// `codes` share the input's layout; the row-major tensor is split into `channels`
/// equal blocks and every code in block `c` is scaled by `scales[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub codes: Vec<f64>,
    pub scales: Vec<f64>,
    pub encoding: Encoding,
}

impl QuantizedTensor {
    pub fn channels(&self) -> usize {
        self.scales.len()
    }

    pub fn channel_len(&self) -> usize {
        self.codes.len() / self.scales.len().max(1)
    }

    pub fn scale_of(&self, index: usize) -> f64 {
        self.scales[index / self.channel_len().max(1)]
    }

    /// True when every scale is 1 and the executor can skip the scaling step.
    pub fn is_unscaled(&self) -> bool {
        self.scales.iter().all(|&s| s == 1.0)
    }

    /// Values the codes stand for, XNOR codes decoded to `-1`/`+1`.
    pub fn dequantize(&self) -> Vec<f64> {
        self.codes
            .iter()
            .enumerate()
            .map(|(i, &code)| {
                let value = match self.encoding {
                    Encoding::Direct => code,
                    Encoding::Xnor => 2.0 * code - 1.0,
                };
                value * self.scale_of(i)
            })
            .collect()
    }
}

/// The closed set of supported quantizers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantizer {
    Uniform(Uniform),
    Ternary(Ternary),
    Binary(Binary),
}

impl Quantizer {
    /// Maps a training-library quantizer call onto a variant.
    pub fn from_spec(spec: &QuantizerSpec) -> Result<Self> {
        match spec.name.as_str() {
            "quantized_bits" => {
                check_keywords(
                    spec,
                    &[
                        "bits",
                        "integer",
                        "symmetric",
                        "keep_negative",
                        "alpha",
                        "use_stochastic_rounding",
                    ],
                    6,
                )?;
                reject_flag(spec, "use_stochastic_rounding", 5)?;

                let bits = count_arg(spec, "bits", 0, 8)?;
                let integer = int_arg(spec, "integer", 1, 0)?;
                let mut q = Uniform::new(bits, integer)?;
                q.symmetric = flag_arg(spec, "symmetric", 2, false)?;
                q.keep_negative = flag_arg(spec, "keep_negative", 3, true)?;
                q.alpha = alpha_arg(spec, 4)?;
                Ok(Quantizer::Uniform(q))
            }
            "quantized_relu" => {
                check_keywords(
                    spec,
                    &[
                        "bits",
                        "integer",
                        "use_sigmoid",
                        "negative_slope",
                        "use_stochastic_rounding",
                    ],
                    5,
                )?;
                reject_flag(spec, "use_sigmoid", 2)?;
                reject_flag(spec, "negative_slope", 3)?;
                reject_flag(spec, "use_stochastic_rounding", 4)?;

                let bits = count_arg(spec, "bits", 0, 8)?;
                let integer = int_arg(spec, "integer", 1, 0)?;
                Ok(Quantizer::Uniform(Uniform::relu(bits, integer)?))
            }
            "ternary" => {
                check_keywords(spec, &["alpha", "threshold", "use_stochastic_rounding"], 3)?;
                reject_flag(spec, "use_stochastic_rounding", 2)?;

                let threshold = match spec.get("threshold", 1) {
                    None => None,
                    Some(SpecValue::Text(t)) if t == "None" => None,
                    Some(value) => {
                        let t = value.as_number().ok_or_else(|| bad_value(spec, "threshold"))?;
                        if !(t.is_finite() && t >= 0.0) {
                            return Err(bad_value(spec, "threshold"));
                        }
                        Some(t)
                    }
                };
                Ok(Quantizer::Ternary(Ternary::new(alpha_arg(spec, 0)?, threshold)))
            }
            "binary" => {
                check_keywords(spec, &["use_01", "alpha", "use_stochastic_rounding"], 3)?;
                reject_flag(spec, "use_01", 0)?;
                reject_flag(spec, "use_stochastic_rounding", 2)?;

                let mut q = Binary::new(true);
                q.alpha = alpha_arg(spec, 1)?;
                Ok(Quantizer::Binary(q))
            }
            "binary_tanh" => {
                check_keywords(spec, &[], 0)?;
                Ok(Quantizer::Binary(Binary::new(false)))
            }
            other => Err(QuantizerError::Unsupported(format!(
                "no fixed-point mapping for quantizer '{}'",
                other
            ))),
        }
    }

    pub fn alpha(&self) -> Alpha {
        match self {
            Quantizer::Uniform(q) => q.alpha,
            Quantizer::Ternary(q) => q.alpha,
            Quantizer::Binary(q) => q.alpha,
        }
    }

    pub fn numeric_type(&self) -> Result<NumericType> {
        match self {
            Quantizer::Uniform(q) => q.numeric_type(),
            Quantizer::Ternary(q) => q.numeric_type(),
            Quantizer::Binary(q) => q.numeric_type(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Quantizer::Uniform(q) if q.is_binary() => Encoding::Xnor,
            Quantizer::Binary(q) if q.is_xnor => Encoding::Xnor,
            _ => Encoding::Direct,
        }
    }

    pub fn activation_kind(&self) -> ActivationKind {
        match self {
            Quantizer::Uniform(q) if q.is_binary() => ActivationKind::Threshold,
            Quantizer::Uniform(q) if q.keep_negative => ActivationKind::Linear,
            Quantizer::Uniform(_) => ActivationKind::Relu,
            Quantizer::Ternary(_) | Quantizer::Binary(_) => ActivationKind::Threshold,
        }
    }

    /// Canonical numeric type plus activation descriptor.
    pub fn resolve(&self) -> Result<Resolution> {
        Ok(Resolution {
            numeric_type: self.numeric_type()?,
            activation: self.activation_kind(),
            encoding: self.encoding(),
        })
    }

    /// Checks the quantizer can run as an activation function.
    pub fn check_activation(&self) -> Result<()> {
        if !self.alpha().is_unit() {
            return Err(QuantizerError::Unsupported(format!(
                "activation quantizer {} has alpha {}, which has no fixed-point form",
                self,
                self.alpha()
            )));
        }
        Ok(())
    }

    /// Code for a single value with unit scale.
    pub fn project(&self, x: f64) -> f64 {
        match self {
            Quantizer::Uniform(q) => q.project(x),
            Quantizer::Ternary(q) => q.project(x),
            Quantizer::Binary(q) => q.project(x),
        }
    }

    /// Projects a row-major tensor with `channels` output channels.
    pub fn project_tensor(&self, values: &[f64], channels: usize) -> Result<QuantizedTensor> {
        if channels == 0 || values.len() % channels != 0 {
            return Err(QuantizerError::InvalidParameter(format!(
                "tensor of {} values cannot be split into {} channels",
                values.len(),
                channels
            )));
        }
        let channel_len = values.len() / channels;

        let mut codes = Vec::with_capacity(values.len());
        let mut scales = Vec::with_capacity(channels);

        for channel in values.chunks(channel_len.max(1)).take(channels) {
            let scale = match self.alpha() {
                Alpha::Fixed(a) => {
                    if !(a.is_finite() && a > 0.0) {
                        return Err(QuantizerError::InvalidParameter(format!(
                            "alpha must be positive and finite, got {}",
                            a
                        )));
                    }
                    codes.extend(channel.iter().map(|&w| self.project_scaled(w, a)));
                    a
                }
                Alpha::Auto => match self {
                    Quantizer::Uniform(q) => {
                        let scale = q.auto_scale(channel);
                        codes.extend(channel.iter().map(|&w| q.project(w / scale)));
                        scale
                    }
                    Quantizer::Ternary(q) => {
                        let (channel_codes, scale) = q.project_auto(channel);
                        codes.extend(channel_codes);
                        scale
                    }
                    Quantizer::Binary(q) => {
                        codes.extend(channel.iter().map(|&w| q.project(w)));
                        q.auto_scale(channel)
                    }
                },
            };
            scales.push(scale);
        }
        // Zero-length channels still get their scale
        scales.resize(channels, 1.0);

        Ok(QuantizedTensor {
            codes,
            scales,
            encoding: self.encoding(),
        })
    }

    fn project_scaled(&self, x: f64, alpha: f64) -> f64 {
        match self {
            Quantizer::Uniform(q) => q.project(x / alpha),
            // Ternary thresholds already account for alpha
            Quantizer::Ternary(q) => q.project(x),
            Quantizer::Binary(q) => q.project(x),
        }
    }
}

impl FromStr for Quantizer {
    type Err = QuantizerError;

    fn from_str(s: &str) -> Result<Self> {
        Quantizer::from_spec(&s.parse()?)
    }
}

impl fmt::Display for Quantizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantizer::Uniform(q) if !q.keep_negative => {
                write!(f, "quantized_relu({},{})", q.bits, q.integer)
            }
            Quantizer::Uniform(q) => write!(
                f,
                "quantized_bits({},{},{},alpha={})",
                q.bits, q.integer, q.symmetric as u8, q.alpha
            ),
            Quantizer::Ternary(q) => match q.threshold {
                Some(t) => write!(f, "ternary(alpha={},threshold={})", q.alpha, t),
                None => write!(f, "ternary(alpha={})", q.alpha),
            },
            Quantizer::Binary(q) if q.is_xnor => write!(f, "binary(alpha={})", q.alpha),
            Quantizer::Binary(_) => write!(f, "binary_tanh"),
        }
    }
}

fn bad_value(spec: &QuantizerSpec, keyword: &str) -> QuantizerError {
    QuantizerError::InvalidParameter(format!("{}: bad value for '{}'", spec, keyword))
}

fn check_keywords(spec: &QuantizerSpec, known: &[&str], max_positional: usize) -> Result<()> {
    let unknown = spec.unknown_keywords(known);
    if !unknown.is_empty() {
        return Err(QuantizerError::Unsupported(format!(
            "{}: unsupported arguments {:?}",
            spec, unknown
        )));
    }
    if spec.args.len() > max_positional {
        return Err(QuantizerError::Unsupported(format!(
            "{}: too many positional arguments",
            spec
        )));
    }
    Ok(())
}

fn int_arg(spec: &QuantizerSpec, keyword: &str, position: usize, default: i32) -> Result<i32> {
    match spec.get(keyword, position) {
        None => Ok(default),
        Some(value) => value
            .as_number()
            .filter(|n| n.fract() == 0.0 && n.abs() <= i32::MAX as f64)
            .map(|n| n as i32)
            .ok_or_else(|| bad_value(spec, keyword)),
    }
}

fn count_arg(spec: &QuantizerSpec, keyword: &str, position: usize, default: u32) -> Result<u32> {
    let value = int_arg(spec, keyword, position, default as i32)?;
    u32::try_from(value).map_err(|_| bad_value(spec, keyword))
}

fn flag_arg(spec: &QuantizerSpec, keyword: &str, position: usize, default: bool) -> Result<bool> {
    match spec.get(keyword, position) {
        None => Ok(default),
        Some(value) => value
            .as_number()
            .map(|n| n != 0.0)
            .ok_or_else(|| bad_value(spec, keyword)),
    }
}

// Options the fixed-point side cannot reproduce must be off.
fn reject_flag(spec: &QuantizerSpec, keyword: &str, position: usize) -> Result<()> {
    let set = match spec.get(keyword, position) {
        None => false,
        Some(SpecValue::Number(n)) => *n != 0.0,
        Some(SpecValue::Text(t)) => t != "None",
    };
    if set {
        return Err(QuantizerError::Unsupported(format!(
            "{}: '{}' is not supported",
            spec, keyword
        )));
    }
    Ok(())
}

fn alpha_arg(spec: &QuantizerSpec, position: usize) -> Result<Alpha> {
    match spec.get("alpha", position) {
        None => Ok(Alpha::default()),
        Some(SpecValue::Number(a)) => {
            if a.is_finite() && *a > 0.0 {
                Ok(Alpha::Fixed(*a))
            } else {
                Err(bad_value(spec, "alpha"))
            }
        }
        Some(SpecValue::Text(t)) => match t.as_str() {
            "auto" => Ok(Alpha::Auto),
            "None" => Ok(Alpha::default()),
            other => Err(QuantizerError::Unsupported(format!(
                "{}: alpha '{}' is not supported",
                spec, other
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn q(s: &str) -> Quantizer {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_spec_variants() {
        assert_eq!(
            q("quantized_bits(4,0,alpha=1)"),
            Quantizer::Uniform(Uniform::new(4, 0).unwrap())
        );
        assert_eq!(
            q("quantized_relu(8,2)"),
            Quantizer::Uniform(Uniform::relu(8, 2).unwrap())
        );
        assert_eq!(q("ternary"), Quantizer::Ternary(Ternary::new(Alpha::Fixed(1.0), None)));
        assert_eq!(
            q("ternary(alpha='auto', threshold=0.2)"),
            Quantizer::Ternary(Ternary::new(Alpha::Auto, Some(0.2)))
        );
        assert_eq!(q("binary()"), Quantizer::Binary(Binary::new(true)));
        assert_eq!(q("binary_tanh"), Quantizer::Binary(Binary::new(false)));
    }

    #[test]
    fn test_unsupported_quantizers() {
        for bad in [
            "quantized_po2(4)",
            "quantized_bits(4,0,use_stochastic_rounding=True)",
            "quantized_bits(4,0,alpha='auto_po2')",
            "quantized_relu(4,0,negative_slope=0.1)",
            "binary(use_01=True)",
            "ternary(foo=1)",
        ] {
            assert!(
                matches!(bad.parse::<Quantizer>(), Err(QuantizerError::Unsupported(_))),
                "{} should be unsupported",
                bad
            );
        }
    }

    #[test]
    fn test_resolution() {
        let r = q("quantized_bits(5,2)").resolve().unwrap();
        assert_eq!(r.numeric_type.to_string(), "fixed<5,3>");
        assert_eq!(r.activation, ActivationKind::Linear);
        assert_eq!(r.encoding, Encoding::Direct);

        let r = q("quantized_relu(4,0)").resolve().unwrap();
        assert_eq!(r.numeric_type.to_string(), "ufixed<4,0>");
        assert_eq!(r.activation, ActivationKind::Relu);

        let r = q("binary").resolve().unwrap();
        assert_eq!(r.numeric_type.to_string(), "ufixed<1,1>");
        assert_eq!(r.activation, ActivationKind::Threshold);
        assert_eq!(r.encoding, Encoding::Xnor);

        let r = q("ternary(alpha=1)").resolve().unwrap();
        assert_eq!(r.numeric_type.to_string(), "fixed<2,2>");
        assert_eq!(r.encoding, Encoding::Direct);
    }

    #[test]
    fn test_activation_rejects_alpha() {
        assert!(q("quantized_bits(4,0,alpha=1)").check_activation().is_ok());
        assert!(q("ternary(alpha='auto')").check_activation().is_err());
        assert!(q("quantized_bits(4,0,alpha=2)").check_activation().is_err());
    }

    #[test]
    fn test_projections_lie_on_grid() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let quantizers = [
            "quantized_bits(4,0)",
            "quantized_bits(8,4)",
            "quantized_bits(5,2,1)",
            "quantized_bits(1,0)",
            "quantized_relu(4,0)",
            "quantized_relu(10,3)",
            "ternary(threshold=0.5)",
            "binary",
            "binary_tanh",
        ];

        for spec in quantizers {
            let quantizer = q(spec);
            let ty = quantizer.numeric_type().unwrap();
            for _ in 0..1000 {
                let x = rng.gen_range(-40.0..40.0) * rng.gen::<f64>().powi(3);
                let code = quantizer.project(x);
                assert!(ty.contains(code), "{} projected {} to {}, off {}", spec, x, code, ty);
            }
        }
    }

    #[test]
    fn test_tensor_projection_fixed_alpha() {
        let quantizer = q("quantized_bits(4,0)");
        let tensor = quantizer.project_tensor(&[0.3, -0.7, 2.0, 0.05], 2).unwrap();
        assert_eq!(tensor.codes, vec![0.25, -0.75, 0.875, 0.0]);
        assert_eq!(tensor.scales, vec![1.0, 1.0]);
        assert!(tensor.is_unscaled());
        assert_eq!(tensor.dequantize(), tensor.codes);
    }

    #[test]
    fn test_tensor_projection_auto_alpha() {
        let quantizer = q("ternary(alpha='auto')");
        let tensor = quantizer
            .project_tensor(&[1.0, -0.5, 0.1, 0.2, 0.2, -0.4], 2)
            .unwrap();
        assert_eq!(tensor.codes, vec![1.0, -1.0, 0.0, 1.0, 1.0, -1.0]);
        assert_eq!(tensor.scales[0], 0.75);
        assert!((tensor.scales[1] - 0.8 / 3.0).abs() < 1e-12);
        assert_eq!(tensor.scale_of(4), tensor.scales[1]);
    }

    #[test]
    fn test_xnor_tensor_dequantizes_bipolar() {
        let tensor = q("binary").project_tensor(&[0.4, -0.1, -2.0], 1).unwrap();
        assert_eq!(tensor.codes, vec![1.0, 0.0, 0.0]);
        assert_eq!(tensor.dequantize(), vec![1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_tensor_projection_rejects_ragged_channels() {
        assert!(q("binary").project_tensor(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(q("binary").project_tensor(&[1.0], 0).is_err());
    }
}
