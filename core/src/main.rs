mod args;

use args::Args;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use log::{debug, info, warn, LevelFilter};
use quantfx::{compare, convert, uniform_rows, ConversionConfig};
use reference::{DenseStack, QModel};
use simplelog::{Config, SimpleLogger, WriteLogger};
use std::error::Error;
use std::fs::File;
use std::time::Instant;

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    let vm = VarMap::new();
    let vb = VarBuilder::from_varmap(&vm, DType::F64, &Device::Cpu);
    let description = DenseStack::new(args.inputs, &args.hidden, args.outputs)
        .with_quantizers(&args.kernel_quantizer, &args.bias_quantizer)
        .with_activation(&args.activation)
        .with_softmax()
        .build(&vb)?;
    info!(
        "Network {} -> {:?} -> {} with {} / {}",
        args.inputs, args.hidden, args.outputs, args.kernel_quantizer, args.activation
    );

    let mut config = ConversionConfig::default();
    for entry in &args.overrides {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got '{}'", entry))?;
        config.set(key, value)?;
    }
    if !args.round_layers.is_empty() {
        let layers: Vec<&str> = args.round_layers.iter().map(String::as_str).collect();
        config = config.with_rounding_pass(&layers, args.rounding, args.saturation);
    }

    let executor = convert(&description, &config)?;
    let simulation = QModel::from_description(&description)?;
    let rows = uniform_rows(args.samples, args.inputs, args.seed);

    let start = Instant::now();
    let output = executor.predict(&rows);
    let fixed_duration = start.elapsed();

    let start = Instant::now();
    let expected = simulation.predict(&rows)?;
    let float_duration = start.elapsed();

    for (row, fault) in output.faults() {
        warn!("Row {}: {}", row, fault);
    }

    let parity = compare(&output, &expected);
    debug!("{:?}", parity);
    info!(
        "Fixed-point: {:?} on {} threads, float simulation: {:?}",
        fixed_duration, args.threads, float_duration
    );
    info!(
        "{} rows, {} faults, max |diff| {:.6}, mean |diff| {:.6}, {:.2}% elements differ, argmax agreement {:.2}%",
        parity.rows,
        parity.faults,
        parity.max_abs_diff,
        parity.mean_abs_diff,
        parity.mismatch * 100.0,
        parity.argmax_agreement * 100.0
    );

    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();

    match &args.log_file {
        Some(log_file) => WriteLogger::init(
            LevelFilter::Debug,
            Config::default(),
            File::create(log_file)?,
        )?,
        None => SimpleLogger::init(LevelFilter::Info, Config::default())?,
    }

    Ok(args)
}
