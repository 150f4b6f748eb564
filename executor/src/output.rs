use crate::error::NumericFault;

/// Per-element results of one `predict` call, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    rows: Vec<Result<Vec<f64>, NumericFault>>,
}

impl BatchOutput {
    pub fn new(rows: Vec<Result<Vec<f64>, NumericFault>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Result<Vec<f64>, NumericFault>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Result<Vec<f64>, NumericFault>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All outputs, or the first fault if any element failed.
    pub fn values(&self) -> Result<Vec<Vec<f64>>, NumericFault> {
        self.rows.iter().cloned().collect()
    }

    /// Faulted elements with their batch index.
    pub fn faults(&self) -> Vec<(usize, &NumericFault)> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| row.as_ref().err().map(|fault| (i, fault)))
            .collect()
    }

    /// Index of the largest output per element (first one on ties); None for faults.
    pub fn argmax(&self) -> Vec<Option<usize>> {
        self.rows
            .iter()
            .map(|row| row.as_ref().ok().and_then(|values| argmax(values)))
            .collect()
    }
}

pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    fn fault() -> NumericFault {
        NumericFault {
            layer: "x".to_string(),
            stage: Stage::Quantizing,
            reason: "NaN".to_string(),
        }
    }

    #[test]
    fn test_helpers() {
        let output = BatchOutput::new(vec![
            Ok(vec![0.1, 0.7, 0.2]),
            Err(fault()),
            Ok(vec![0.5, 0.5, 0.0]),
        ]);

        assert_eq!(output.len(), 3);
        assert_eq!(output.argmax(), vec![Some(1), None, Some(0)]);
        assert_eq!(output.faults(), vec![(1, &fault())]);
        assert_eq!(output.values(), Err(fault()));
    }

    #[test]
    fn test_values_without_faults() {
        let output = BatchOutput::new(vec![Ok(vec![1.0]), Ok(vec![2.0])]);
        assert_eq!(output.values().unwrap(), vec![vec![1.0], vec![2.0]]);
        assert!(output.faults().is_empty());
        assert_eq!(argmax(&[]), None);
    }
}
