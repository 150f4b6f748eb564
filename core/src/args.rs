use std::path::PathBuf;

use clap::Parser;
use fixed::{RoundingMode, SaturationMode};

#[derive(Parser, Debug)]
#[command(name = "quantfx")]
#[command(author = "Jørgen Hanssen <jorgen@hanssen.io>")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Converts a randomly initialised quantized network and compares the fixed-point executor with its float simulation")]
pub struct Args {
    /// Write debug logs to a file instead of info logs to the terminal.
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,

    /// Worker threads for batch prediction.
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub threads: usize,

    #[arg(long, default_value_t = 16)]
    pub inputs: usize,

    /// Hidden layer widths.
    #[arg(long, value_delimiter = ',', default_values_t = vec![64, 32, 32])]
    pub hidden: Vec<usize>,

    #[arg(long, default_value_t = 5)]
    pub outputs: usize,

    #[arg(long, default_value = "quantized_bits(6,0,alpha=1)")]
    pub kernel_quantizer: String,

    #[arg(long, default_value = "quantized_bits(6,0,alpha=1)")]
    pub bias_quantizer: String,

    #[arg(long, default_value = "quantized_relu(6,0)")]
    pub activation: String,

    #[arg(long, default_value_t = 1000)]
    pub samples: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Precision entry as `key=value`, e.g. `LayerName.dense1.Precision.accum=fixed<24,10>`.
    #[arg(short, long = "set")]
    pub overrides: Vec<String>,

    /// Layer names or class names whose output rounding/saturation is rewritten.
    #[arg(long, value_delimiter = ',', default_values_t = vec!["Activation".to_string()])]
    pub round_layers: Vec<String>,

    #[arg(long, default_value = "RND_CONV")]
    pub rounding: RoundingMode,

    #[arg(long, default_value = "SAT")]
    pub saturation: SaturationMode,
}
