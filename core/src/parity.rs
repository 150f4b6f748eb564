use executor::{argmax, BatchOutput};

/// Agreement between fixed-point outputs and a float reference.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Parity {
    pub rows: usize,
    pub faults: usize,
    pub max_abs_diff: f64,
    pub mean_abs_diff: f64,
    /// Fraction of compared elements that differ at all.
    pub mismatch: f64,
    /// Fraction of rows whose argmax agrees.
    pub argmax_agreement: f64,
}

/// Compares row by row; faulted rows are counted and skipped.
pub fn compare(fixed: &BatchOutput, reference: &[Vec<f64>]) -> Parity {
    let mut parity = Parity {
        rows: fixed.len().min(reference.len()),
        ..Default::default()
    };

    let mut elements = 0usize;
    let mut mismatched = 0usize;
    let mut total_diff = 0.0;
    let mut agreeing = 0usize;

    for (row, expected) in fixed.rows().iter().zip(reference) {
        let Ok(values) = row else {
            parity.faults += 1;
            continue;
        };

        for (a, b) in values.iter().zip(expected) {
            let diff = (a - b).abs();
            parity.max_abs_diff = parity.max_abs_diff.max(diff);
            total_diff += diff;
            mismatched += (diff > 0.0) as usize;
            elements += 1;
        }
        if argmax(values) == argmax(expected) {
            agreeing += 1;
        }
    }

    let compared = parity.rows - parity.faults;
    if elements > 0 {
        parity.mean_abs_diff = total_diff / elements as f64;
        parity.mismatch = mismatched as f64 / elements as f64;
    }
    if compared > 0 {
        parity.argmax_agreement = agreeing as f64 / compared as f64;
    }
    parity
}

/// Fraction of predictions whose argmax equals the label.
pub fn accuracy(predictions: &[Option<usize>], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| **p == Some(**l))
        .count();
    correct as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor::{NumericFault, Stage};

    #[test]
    fn test_compare_skips_faults() {
        let fixed = BatchOutput::new(vec![
            Ok(vec![0.5, 0.25]),
            Err(NumericFault {
                layer: "x".to_string(),
                stage: Stage::Quantizing,
                reason: "NaN".to_string(),
            }),
            Ok(vec![0.0, 1.0]),
        ]);
        let reference = vec![vec![0.25, 0.5], vec![0.0, 0.0], vec![0.0, 1.0]];

        let parity = compare(&fixed, &reference);
        assert_eq!(parity.rows, 3);
        assert_eq!(parity.faults, 1);
        assert_eq!(parity.max_abs_diff, 0.25);
        assert_eq!(parity.mismatch, 0.5);
        assert_eq!(parity.argmax_agreement, 0.5);
    }

    #[test]
    fn test_accuracy() {
        let predictions = vec![Some(0), Some(2), None, Some(1)];
        assert_eq!(accuracy(&predictions, &[0, 2, 1, 0]), 0.5);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }
}
