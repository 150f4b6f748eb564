use std::fmt;
use std::str::FromStr;

use crate::error::{QuantizerError, Result};

/// A single argument of a quantizer call, e.g. `4`, `'auto'` or `True`.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecValue {
    Number(f64),
    Text(String),
}

impl SpecValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SpecValue::Number(n) => Some(*n),
            SpecValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SpecValue::Text(t) => Some(t),
            SpecValue::Number(_) => None,
        }
    }
}

impl fmt::Display for SpecValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecValue::Number(n) => write!(f, "{}", n),
            SpecValue::Text(t) => write!(f, "'{}'", t),
        }
    }
}

/// A quantizer as written in the training library, e.g. `quantized_bits(4,0,alpha=1)`.
///
/// Parsing only tokenizes; `Quantizer::from_spec` decides what the name means.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizerSpec {
    pub name: String,
    pub args: Vec<SpecValue>,
    pub kwargs: Vec<(String, SpecValue)>,
}

impl QuantizerSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    /// Looks up an argument by keyword, falling back to its position.
    pub fn get(&self, keyword: &str, position: usize) -> Option<&SpecValue> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
            .or_else(|| self.args.get(position))
    }

    /// Keywords that are not in `known`.
    pub fn unknown_keywords<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.kwargs
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !known.contains(k))
            .collect()
    }
}

impl FromStr for QuantizerSpec {
    type Err = QuantizerError;

    fn from_str(s: &str) -> Result<Self> {
        let parse_error = || QuantizerError::Parse(s.to_string());
        let trimmed = s.trim();

        let Some((name, rest)) = trimmed.split_once('(') else {
            if trimmed.is_empty() || !trimmed.chars().all(is_identifier_char) {
                return Err(parse_error());
            }
            return Ok(QuantizerSpec::new(trimmed));
        };

        let name = name.trim();
        let body = rest.strip_suffix(')').ok_or_else(parse_error)?;
        if name.is_empty() || !name.chars().all(is_identifier_char) || body.contains(['(', ')'])
        {
            return Err(parse_error());
        }

        let mut spec = QuantizerSpec::new(name);
        for token in body.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    let value = parse_value(value.trim()).ok_or_else(parse_error)?;
                    spec.kwargs.push((key.trim().to_string(), value));
                }
                None => {
                    if !spec.kwargs.is_empty() {
                        // Positional after keyword, as in Python
                        return Err(parse_error());
                    }
                    spec.args.push(parse_value(token).ok_or_else(parse_error)?);
                }
            }
        }

        Ok(spec)
    }
}

impl fmt::Display for QuantizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let positional = self.args.iter().map(|a| a.to_string());
        let keywords = self.kwargs.iter().map(|(k, v)| format!("{}={}", k, v));
        let joined: Vec<String> = positional.chain(keywords).collect();
        write!(f, "{})", joined.join(","))
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_value(token: &str) -> Option<SpecValue> {
    match token {
        "True" | "true" => return Some(SpecValue::Number(1.0)),
        "False" | "false" => return Some(SpecValue::Number(0.0)),
        "None" => return Some(SpecValue::Text("None".to_string())),
        _ => {}
    }

    if let Ok(number) = token.parse::<f64>() {
        return Some(SpecValue::Number(number));
    }

    let quoted = token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| token.strip_prefix('"').and_then(|t| t.strip_suffix('"')))?;
    Some(SpecValue::Text(quoted.to_string()))
}
