use fixed::{RoundingMode, SaturationMode};
use model::{
    resolve, Graph, LayerDescription, NetworkDescription, OutputRoundingSaturation,
    PrecisionConfig,
};

use crate::{compile, Executor, ExecutorError, Stage};

fn resolved(description: &NetworkDescription, config: &PrecisionConfig) -> Graph {
    let mut graph = Graph::from_description(description).unwrap();
    resolve(&mut graph, config).unwrap();
    graph
}

fn build(description: &NetworkDescription, config: &PrecisionConfig) -> Executor {
    compile(&resolved(description, config)).unwrap()
}

fn build_with_pass(
    description: &NetworkDescription,
    config: &PrecisionConfig,
    pass: &OutputRoundingSaturation,
) -> Executor {
    let mut graph = resolved(description, config);
    pass.apply(&mut graph).unwrap();
    compile(&graph).unwrap()
}

fn single_weight(weight: f64) -> NetworkDescription {
    NetworkDescription::new()
        .with(LayerDescription::input("x", 1))
        .with(
            LayerDescription::dense("fc", 1, vec![weight], None)
                .with_quantizers(Some("quantized_bits(4,0)"), None),
        )
}

fn narrow_result_config() -> PrecisionConfig {
    let mut config = PrecisionConfig::default();
    config.set("LayerName.fc.Precision", "fixed<4,2>").unwrap();
    config
}

fn assert_approx_eq(a: f64, b: f64, epsilon: f64, description: &str) {
    assert!(
        (a - b).abs() < epsilon,
        "{} differ by more than epsilon: |{} - {}| = {} > {}",
        description,
        a,
        b,
        (a - b).abs(),
        epsilon
    );
}

#[test]
fn test_dense_is_exact() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 2))
        .with(
            LayerDescription::dense("fc", 1, vec![0.5, -0.25], Some(vec![0.25]))
                .with_quantizers(Some("quantized_bits(4,0)"), Some("quantized_bits(5,2)")),
        );
    let executor = build(&description, &PrecisionConfig::default());

    assert_eq!(executor.predict_row(&[1.5, 2.0]).unwrap(), vec![0.5]);
    // Inputs are truncated onto fixed<16,6> first: 2^-11 disappears
    assert_eq!(
        executor.predict_row(&[1.5 + 2f64.powi(-11), 2.0]).unwrap(),
        vec![0.5]
    );
}

#[test]
fn test_result_rounding_modes() {
    let description = single_weight(0.625);
    let config = narrow_result_config();

    let truncating = build(&description, &config);
    assert_eq!(truncating.predict_row(&[1.0]).unwrap(), vec![0.5]);

    let pass = |rounding| OutputRoundingSaturation::new(&["fc"], rounding, SaturationMode::Wrap);
    let nearest = build_with_pass(&description, &config, &pass(RoundingMode::RoundNearest));
    assert_eq!(nearest.predict_row(&[1.0]).unwrap(), vec![0.75]);

    let even = build_with_pass(&description, &config, &pass(RoundingMode::RoundNearestEven));
    assert_eq!(even.predict_row(&[1.0]).unwrap(), vec![0.5]);
}

#[test]
fn test_result_wraps_or_saturates() {
    let description = single_weight(0.5);
    let config = narrow_result_config();

    let wrapping = build(&description, &config);
    assert_eq!(wrapping.predict_row(&[4.0]).unwrap(), vec![-2.0]);

    let pass = OutputRoundingSaturation::new(
        &["Dense"],
        RoundingMode::Truncate,
        SaturationMode::Saturate,
    );
    let saturating = build_with_pass(&description, &config, &pass);
    assert_eq!(saturating.predict_row(&[4.0]).unwrap(), vec![1.75]);
    assert_eq!(saturating.predict_row(&[-10.0]).unwrap(), vec![-2.0]);
}

#[test]
fn test_narrowed_accumulator_behaves_like_a_register() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 3))
        .with(
            LayerDescription::dense("fc", 1, vec![0.5, 0.5, 0.5], None)
                .with_quantizers(Some("quantized_bits(4,0)"), None),
        );
    let mut config = PrecisionConfig::default();
    config.set("LayerName.fc.Precision.accum", "fixed<8,3>").unwrap();
    config.set("LayerName.fc.Precision.accum.saturation_mode", "SAT").unwrap();

    let executor = build(&description, &config);
    // Partial sums clip at 3.96875 before the last term is added
    assert_eq!(executor.predict_row(&[6.0, 6.0, -6.0]).unwrap(), vec![0.96875]);
}

#[test]
fn test_xnor_network() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 2))
        .with(
            LayerDescription::dense("fc", 2, vec![0.3, -0.7, -1.0, -1.0], None)
                .with_quantizers(Some("binary()"), None),
        )
        .with(LayerDescription::activation("act", "binary()"))
        .with(
            LayerDescription::dense("fc2", 1, vec![1.0, 1.0], None)
                .with_quantizers(Some("binary()"), None),
        );
    let executor = build(&description, &PrecisionConfig::default());

    // fc computes [0.75, -0.25]; act emits XNOR codes [1, 0] which fc2 reads as [+1, -1]
    assert_eq!(executor.predict_row(&[0.5, -0.25]).unwrap(), vec![0.0]);

    let head = NetworkDescription {
        layers: description.layers[..3].to_vec(),
    };
    let executor = build(&head, &PrecisionConfig::default());
    // A network ending in an XNOR activation returns raw codes
    assert_eq!(executor.predict_row(&[0.5, -0.25]).unwrap(), vec![1.0, 0.0]);
}

#[test]
fn test_threshold_activations() {
    let description = |function: &str| {
        NetworkDescription::new()
            .with(LayerDescription::input("x", 5))
            .with(LayerDescription::activation("act", function))
    };
    let row = [-1.0, -0.25, 0.0, 0.25, 1.0];

    let ternary = build(&description("ternary(threshold=0.2)"), &PrecisionConfig::default());
    assert_eq!(ternary.predict_row(&row).unwrap(), vec![-1.0, -1.0, 0.0, 1.0, 1.0]);

    let ternary = build(&description("ternary"), &PrecisionConfig::default());
    assert_eq!(ternary.predict_row(&row).unwrap(), vec![-1.0, 0.0, 0.0, 0.0, 1.0]);

    let bipolar = build(&description("binary_tanh"), &PrecisionConfig::default());
    assert_eq!(bipolar.predict_row(&row).unwrap(), vec![-1.0, -1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn test_quantized_relu_saturates_with_pass() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 3))
        .with(LayerDescription::activation("relu", "quantized_relu(4,1)"));
    let pass = OutputRoundingSaturation::new(
        &["Activation"],
        RoundingMode::RoundNearestEven,
        SaturationMode::Saturate,
    );
    let executor = build_with_pass(&description, &PrecisionConfig::default(), &pass);
    assert_eq!(
        executor.predict_row(&[-3.0, 0.59375, 5.0]).unwrap(),
        vec![0.0, 0.625, 1.875]
    );
}

#[test]
fn test_batch_norm_and_merges() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 2))
        .with(LayerDescription::batch_norm(
            "bn",
            vec![1.0, 2.0],
            vec![0.5, -0.5],
            vec![1.0, 0.0],
            vec![1.0, 4.0],
            0.0,
        ))
        .with(LayerDescription::add("sum", &["x", "bn"]))
        .with(LayerDescription::concatenate("cat", &["sum", "x"]));
    let executor = build(&description, &PrecisionConfig::default());

    // bn: [(3 - 1) * 1 + 0.5, 2 * 1 - 0.5] = [2.5, 1.5]
    assert_eq!(
        executor.predict_row(&[3.0, 2.0]).unwrap(),
        vec![5.5, 3.5, 3.0, 2.0]
    );
}

#[test]
fn test_softmax_approximates_reference() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 3))
        .with(LayerDescription::softmax("softmax"));
    let executor = build(&description, &PrecisionConfig::default());

    let logits = [1.0, 2.0, 0.0];
    let exps: Vec<f64> = logits.iter().map(|x: &f64| x.exp()).collect();
    let total: f64 = exps.iter().sum();

    let output = executor.predict_row(&logits).unwrap();
    for (got, e) in output.iter().zip(&exps) {
        assert_approx_eq(*got, e / total, 0.05, "Softmax outputs");
    }
    assert_eq!(crate::argmax(&output), Some(1));
}

#[test]
fn test_fault_isolation() {
    let executor = build(&single_weight(0.5), &PrecisionConfig::default());
    let batch = vec![vec![1.0], vec![f64::NAN], vec![2.0], vec![1.0, 2.0]];
    let output = executor.predict(&batch);

    assert_eq!(output.len(), 4);
    assert_eq!(output.rows()[0], Ok(vec![0.5]));
    assert_eq!(output.rows()[2], Ok(vec![1.0]));

    let faults = output.faults();
    assert_eq!(faults.len(), 2);
    assert_eq!(faults[0].0, 1);
    assert_eq!(faults[0].1.layer, "x");
    assert_eq!(faults[0].1.stage, Stage::Quantizing);
    assert_eq!(faults[1].0, 3);
}

#[test]
fn test_trace_stages() {
    let executor = build(&single_weight(0.5), &PrecisionConfig::default());
    let full = vec![
        Stage::Pending,
        Stage::Quantizing,
        Stage::Accumulating,
        Stage::Narrowing,
        Stage::Done,
    ];
    assert_eq!(
        executor.trace(&[1.0]),
        vec![("x", full.clone()), ("fc", full)]
    );
    assert_eq!(
        executor.trace(&[f64::INFINITY]),
        vec![
            ("x", vec![Stage::Pending, Stage::Quantizing, Stage::Failed]),
            ("fc", vec![Stage::Pending]),
        ]
    );
}

#[test]
fn test_every_layer_kind_walks_all_stages() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 2))
        .with(
            LayerDescription::dense("fc", 2, vec![0.5, 0.25, -0.5, 0.75], Some(vec![0.0, 0.25]))
                .with_quantizers(Some("quantized_bits(4,0)"), Some("quantized_bits(4,0)")),
        )
        .with(LayerDescription::batch_norm(
            "bn",
            vec![1.0, 1.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            0.0,
        ))
        .with(LayerDescription::activation("act", "quantized_relu(6,2)"))
        .with(LayerDescription::activation("sign", "binary()"))
        .with(LayerDescription::add("sum", &["act", "bn"]))
        .with(LayerDescription::concatenate("cat", &["sum", "sign"]))
        .with(LayerDescription::softmax("softmax"));
    let executor = build(&description, &PrecisionConfig::default());

    let full = [
        Stage::Pending,
        Stage::Quantizing,
        Stage::Accumulating,
        Stage::Narrowing,
        Stage::Done,
    ];
    let trace = executor.trace(&[1.0, -0.5]);
    assert_eq!(trace.len(), 8);
    for (layer, history) in trace {
        assert_eq!(history, full, "stages of '{}'", layer);
    }
}

#[test]
fn test_compile_rejects_empty_softmax_tables() {
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 3))
        .with(LayerDescription::softmax("softmax"));
    let mut graph = resolved(&description, &PrecisionConfig::default());
    for layer in graph.layers_mut() {
        if layer.name() == "softmax" {
            layer.set_table_size(0);
        }
    }

    match compile(&graph) {
        Err(ExecutorError::InvalidTableSize { layer, size }) => {
            assert_eq!(layer, "softmax");
            assert_eq!(size, 0);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_deterministic() {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let weights: Vec<f64> = (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let description = NetworkDescription::new()
        .with(LayerDescription::input("x", 8))
        .with(
            LayerDescription::dense("fc", 8, weights, None)
                .with_quantizers(Some("quantized_bits(6,0)"), None),
        )
        .with(LayerDescription::activation("act", "quantized_relu(6,2)"));
    let executor = build(&description, &PrecisionConfig::default());

    let batch: Vec<Vec<f64>> = (0..50)
        .map(|_| (0..8).map(|_| rng.gen_range(-4.0..4.0)).collect())
        .collect();
    assert_eq!(executor.predict(&batch), executor.predict(&batch));
}

#[test]
fn test_compile_rejects_unresolved_graph() {
    let graph = Graph::from_description(&single_weight(0.5)).unwrap();
    assert!(matches!(
        compile(&graph),
        Err(ExecutorError::UnresolvedType { .. })
    ));
}

#[test]
fn test_compile_rejects_non_finite_parameters() {
    let graph = resolved(&single_weight(f64::INFINITY), &PrecisionConfig::default());
    match compile(&graph) {
        Err(ExecutorError::NonFiniteParameter { layer, parameter }) => {
            assert_eq!(layer, "fc");
            assert_eq!(parameter, "weights");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_executor_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Executor>();
}
