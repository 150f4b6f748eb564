use std::str::FromStr;

use ahash::AHashMap;
use fixed::{NumericType, RoundingMode, SaturationMode};

use crate::error::{ModelError, Result};
use crate::layer::Port;

/// Field-level override of a numeric type. Unset fields keep the value the
/// earlier resolution stages produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TypeOverride {
    pub total_bits: Option<u32>,
    pub integer_bits: Option<i32>,
    pub signed: Option<bool>,
    pub rounding: Option<RoundingMode>,
    pub saturation: Option<SaturationMode>,
}

impl TypeOverride {
    /// Replaces every field.
    pub fn whole(ty: NumericType) -> Self {
        Self {
            total_bits: Some(ty.total_bits()),
            integer_bits: Some(ty.integer_bits()),
            signed: Some(ty.is_signed()),
            rounding: Some(ty.rounding_mode()),
            saturation: Some(ty.saturation_mode()),
        }
    }

    /// The type this override names on its own, when every field is set.
    pub fn as_type(&self) -> Option<NumericType> {
        let ty = NumericType::new(self.total_bits?, self.integer_bits?, self.signed?).ok()?;
        Some(ty.with_modes(self.rounding?, self.saturation?))
    }

    pub fn merge(&mut self, other: &TypeOverride) {
        self.total_bits = other.total_bits.or(self.total_bits);
        self.integer_bits = other.integer_bits.or(self.integer_bits);
        self.signed = other.signed.or(self.signed);
        self.rounding = other.rounding.or(self.rounding);
        self.saturation = other.saturation.or(self.saturation);
    }

    pub fn apply(&self, base: NumericType) -> Result<NumericType> {
        let ty = NumericType::new(
            self.total_bits.unwrap_or(base.total_bits()),
            self.integer_bits.unwrap_or(base.integer_bits()),
            self.signed.unwrap_or(base.is_signed()),
        )?;
        Ok(ty.with_modes(
            self.rounding.unwrap_or(base.rounding_mode()),
            self.saturation.unwrap_or(base.saturation_mode()),
        ))
    }

    fn set_field(&mut self, field: &str, value: &str) -> Result<()> {
        let bad = || ModelError::InvalidConfig(format!("bad value '{}' for {}", value, field));
        match field {
            "total_bits" | "width" => self.total_bits = Some(value.parse().map_err(|_| bad())?),
            "integer_bits" | "integer" => {
                self.integer_bits = Some(value.parse().map_err(|_| bad())?)
            }
            "is_signed" | "signed" => self.signed = Some(parse_bool(value).ok_or_else(bad)?),
            "rounding_mode" | "rounding" => self.rounding = Some(value.parse()?),
            "saturation_mode" | "saturation" => self.saturation = Some(value.parse()?),
            _ => {
                return Err(ModelError::InvalidConfig(format!(
                    "unknown type field '{}'",
                    field
                )))
            }
        }
        Ok(())
    }
}

/// Overrides for one scope: the whole model or a single named layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerOverrides {
    pub ports: AHashMap<Port, TypeOverride>,
    table_size: Option<usize>,
}

impl LayerOverrides {
    pub fn port(&self, port: Port) -> Option<&TypeOverride> {
        self.ports.get(&port)
    }

    pub fn set_type(&mut self, port: Port, ty: NumericType) {
        self.ports.insert(port, TypeOverride::whole(ty));
    }

    pub fn table_size(&self) -> Option<usize> {
        self.table_size
    }

    /// Softmax lookup tables need at least one entry.
    pub fn set_table_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(ModelError::InvalidConfig("table_size must be at least 1".to_string()));
        }
        self.table_size = Some(size);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.table_size.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Model,
    Name,
}

impl FromStr for Granularity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "model" => Ok(Granularity::Model),
            "name" | "layername" => Ok(Granularity::Name),
            _ => Err(ModelError::InvalidConfig(format!("unknown granularity '{}'", s))),
        }
    }
}

/// Precision configuration: a global default type, model-wide overrides and
/// per-layer overrides, applied in that order of increasing priority.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionConfig {
    pub default_type: NumericType,
    pub model: LayerOverrides,
    pub layers: AHashMap<String, LayerOverrides>,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            default_type: default_precision(),
            model: LayerOverrides::default(),
            layers: AHashMap::new(),
        }
    }
}

pub fn default_precision() -> NumericType {
    NumericType::DEFAULT_PRECISION
}

impl PrecisionConfig {
    pub fn layer(&self, name: &str) -> Option<&LayerOverrides> {
        self.layers.get(name)
    }

    pub fn layer_mut(&mut self, name: &str) -> &mut LayerOverrides {
        self.layers.entry(name.to_string()).or_default()
    }

    /// Updates one entry from a dotted key, e.g.
    /// `LayerName.fc1.Precision.weight` = `fixed<8,3>` or
    /// `Model.Precision.accum.saturation_mode` = `SAT`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let segments: Vec<&str> = key.split('.').map(str::trim).collect();
        let unknown = || ModelError::InvalidConfig(format!("unknown configuration key '{}'", key));

        let (layer, rest) = match segments.as_slice() {
            [scope, rest @ ..] if scope.eq_ignore_ascii_case("model") => (None, rest),
            [scope, name, rest @ ..]
                if scope.eq_ignore_ascii_case("layername") || scope.eq_ignore_ascii_case("name") =>
            {
                if name.is_empty() {
                    return Err(unknown());
                }
                (Some(*name), rest)
            }
            _ => return Err(unknown()),
        };

        let value = value.trim();
        match rest {
            ["Precision"] => match layer {
                None => self.default_type = value.parse()?,
                Some(name) => self.layer_mut(name).set_type(Port::Result, value.parse()?),
            },
            ["Precision", port] => {
                let port: Port = port.parse()?;
                self.scope_mut(layer).set_type(port, value.parse()?);
            }
            ["Precision", port, field] => {
                let port: Port = port.parse()?;
                self.scope_mut(layer)
                    .ports
                    .entry(port)
                    .or_default()
                    .set_field(field, value)?;
            }
            ["exp_table_t"] => self.scope_mut(layer).set_type(Port::ExpTable, value.parse()?),
            ["inv_table_t"] => self.scope_mut(layer).set_type(Port::InvTable, value.parse()?),
            ["table_size"] => {
                let size: usize = value.parse().map_err(|_| {
                    ModelError::InvalidConfig(format!("bad table_size '{}'", value))
                })?;
                self.scope_mut(layer).set_table_size(size)?;
            }
            _ => return Err(unknown()),
        }

        Ok(())
    }

    fn scope_mut(&mut self, layer: Option<&str>) -> &mut LayerOverrides {
        match layer {
            None => &mut self.model,
            Some(name) => self.layer_mut(name),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
