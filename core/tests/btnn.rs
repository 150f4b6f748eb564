mod common;

use common::{decode_xnor, uniform_weights};
use model::{config_from_graph, Graph, Granularity, LayerDescription, NetworkDescription};
use quantfx::{convert, uniform_rows, ConversionConfig};
use reference::QModel;

const N: usize = 10;
const UNITS: usize = 10;

struct Case {
    kernel: &'static str,
    activation: &'static str,
    batch_norm: bool,
    is_xnor: bool,
}

const CASES: &[Case] = &[
    Case { kernel: "ternary(alpha=1)", activation: "binary_tanh", batch_norm: false, is_xnor: false },
    Case { kernel: "binary()", activation: "binary_tanh", batch_norm: false, is_xnor: true },
    Case { kernel: "ternary(alpha='auto')", activation: "binary()", batch_norm: true, is_xnor: true },
    Case { kernel: "ternary(alpha='auto')", activation: "ternary", batch_norm: true, is_xnor: false },
    Case { kernel: "ternary(alpha='auto')", activation: "ternary(threshold=0.2)", batch_norm: true, is_xnor: false },
    Case { kernel: "ternary(alpha='auto')", activation: "ternary(threshold=0.8)", batch_norm: true, is_xnor: false },
    Case { kernel: "binary()", activation: "binary()", batch_norm: false, is_xnor: true },
];

fn make_btnn(case: &Case, seed: u64) -> NetworkDescription {
    let limit = (6.0 / (N + UNITS) as f64).sqrt();
    let mut description = NetworkDescription::new()
        .with(LayerDescription::input("x", N))
        .with(
            LayerDescription::dense(
                "dense",
                UNITS,
                uniform_weights(N * UNITS, limit, seed),
                Some(uniform_weights(UNITS, 1.0, seed + 1)),
            )
            .with_quantizers(Some(case.kernel), Some("quantized_bits(5,2)")),
        );

    if case.batch_norm {
        // Dyadic statistics keep the folded scale and shift exact
        let gamma = (0..UNITS).map(|i| [0.5, 1.0, 2.0][i % 3]).collect();
        let beta = (0..UNITS).map(|i| (i as f64 - 5.0) / 8.0).collect();
        let mean = (0..UNITS).map(|i| (i % 4) as f64 / 8.0).collect();
        description.push(LayerDescription::batch_norm(
            "bn",
            gamma,
            beta,
            mean,
            vec![0.25; UNITS],
            0.0,
        ));
    }

    description.with(LayerDescription::activation("activation", case.activation))
}

/// Fraction of outputs where the executor and the float simulation disagree.
fn mismatch(case: &Case, description: &NetworkDescription, config: &ConversionConfig) -> f64 {
    let x = uniform_rows(100, N, 10);

    let executor = convert(description, config).unwrap();
    let simulation = QModel::from_description(description).unwrap();

    let mut fixed = executor.predict(&x).values().unwrap();
    if case.is_xnor {
        fixed = decode_xnor(fixed);
    }
    let expected = simulation.predict(&x).unwrap();

    let total = fixed.iter().map(Vec::len).sum::<usize>();
    let wrong = fixed
        .iter()
        .flatten()
        .zip(expected.iter().flatten())
        .filter(|(a, b)| a != b)
        .count();

    assert_eq!(total, 100 * UNITS);
    wrong as f64 / total as f64
}

#[test]
fn test_btnn() {
    for (i, case) in CASES.iter().enumerate() {
        let description = make_btnn(case, 100 + i as u64);

        let mut config = ConversionConfig::default();
        // Extra fractional bits for alpha scales and the dense output
        config.set("Model.Precision.scale", "fixed<24,4>").unwrap();
        config.set("LayerName.dense.Precision", "fixed<32,8>").unwrap();

        let rate = mismatch(case, &description, &config);
        assert!(
            rate < 0.005,
            "{} -> {}: mismatch rate {}",
            case.kernel,
            case.activation,
            rate
        );
    }
}

#[test]
fn test_btnn_exported_config() {
    for (i, case) in CASES.iter().enumerate() {
        let description = make_btnn(case, 100 + i as u64);

        let graph = Graph::from_description(&description).unwrap();
        let config = ConversionConfig::new(config_from_graph(&graph, Granularity::Name).unwrap());

        let rate = mismatch(case, &description, &config);
        assert!(
            rate < 0.005,
            "{} -> {} with exported types: mismatch rate {}",
            case.kernel,
            case.activation,
            rate
        );
    }
}
