mod common;

use fixed::{RoundingMode, SaturationMode};
use model::{config_from_graph, Graph, Granularity, LayerDescription, NetworkDescription};
use quantfx::{accuracy, convert, Clusters, ConversionConfig};
use reference::QModel;

const FEATURES: usize = 16;
const CLASSES: usize = 5;

/// Three hidden layers that carry the input through `[relu(x), relu(-x)]` and back,
/// then a nearest-centre read-out: `logit_k = c_k . x - |c_k|^2 / 2`.
fn make_classifier(centers: &[Vec<f64>]) -> NetworkDescription {
    let width = 2 * FEATURES;

    let mut split = vec![0.0; width * FEATURES];
    for i in 0..FEATURES {
        split[i * FEATURES + i] = 1.0;
        split[(FEATURES + i) * FEATURES + i] = -1.0;
    }

    let mut copy = vec![0.0; width * width];
    for i in 0..width {
        copy[i * width + i] = 1.0;
    }

    let mut merge = vec![0.0; FEATURES * width];
    for i in 0..FEATURES {
        merge[i * width + i] = 1.0;
        merge[i * width + FEATURES + i] = -1.0;
    }

    let readout: Vec<f64> = centers.iter().flatten().copied().collect();
    let offsets: Vec<f64> = centers
        .iter()
        .map(|c| -c.iter().map(|v| v * v).sum::<f64>() / 2.0)
        .collect();

    NetworkDescription::new()
        .with(LayerDescription::input("input", FEATURES))
        .with(
            LayerDescription::dense("dense1", width, split, None)
                .with_quantizers(Some("quantized_bits(6,1)"), Some("quantized_bits(6,0)")),
        )
        .with(LayerDescription::activation("relu1", "quantized_relu(8,3)"))
        .with(
            LayerDescription::dense("dense2", width, copy, None)
                .with_quantizers(Some("quantized_bits(4,1)"), Some("quantized_bits(4,1)")),
        )
        .with(LayerDescription::activation("relu2", "quantized_relu(8,3)"))
        .with(
            LayerDescription::dense("dense3", FEATURES, merge, None)
                .with_quantizers(Some("ternary(alpha=1)"), Some("quantized_bits(4,1)")),
        )
        .with(LayerDescription::activation("act3", "quantized_bits(10,3)"))
        .with(
            LayerDescription::dense("output", CLASSES, readout, Some(offsets))
                .with_quantizers(Some("quantized_bits(8,1)"), Some("quantized_bits(10,4)")),
        )
        .with(LayerDescription::softmax("softmax"))
}

#[test]
fn test_accuracy() {
    let data = Clusters::generate(CLASSES, FEATURES, 1000, 0.5, 7);
    let description = make_classifier(&data.centers);

    let graph = Graph::from_description(&description).unwrap();
    let mut config = ConversionConfig::new(config_from_graph(&graph, Granularity::Name).unwrap())
        .with_rounding_pass(&["Activation"], RoundingMode::RoundNearest, SaturationMode::Saturate);
    config.set("LayerName.softmax.exp_table_t", "fixed<18,8>").unwrap();
    config.set("LayerName.softmax.inv_table_t", "fixed<18,4>").unwrap();

    let executor = convert(&description, &config).unwrap();
    let simulation = QModel::from_description(&description).unwrap();

    let simulated: Vec<Option<usize>> = simulation
        .predict(&data.inputs)
        .unwrap()
        .iter()
        .map(|row| executor::argmax(row))
        .collect();
    let output = executor.predict(&data.inputs);
    assert!(output.faults().is_empty());

    let acc_simulation = accuracy(&simulated, &data.labels);
    let acc_fixed = accuracy(&output.argmax(), &data.labels);
    println!("Simulation accuracy: {:.4}, fixed-point accuracy: {:.4}", acc_simulation, acc_fixed);

    assert!(acc_simulation > 0.7);
    assert!((acc_fixed - acc_simulation).abs() / acc_simulation < 0.01);
}
