//! Single-image classification demo.
//!
//! Reads a pre-sized raw input buffer (for MNIST: 28x28 float32 pixels,
//! row-major), runs one invoke, and prints the top classes. Image decoding
//! and resizing are out of scope; pre-convert to the input tensor's exact
//! shape and element type.
//!
//! Build with `--features link` against the system engine, or with
//! `--features fake-engine` to run offline against a JSON descriptor model.

use std::fs;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use giztoy_tflite::{ElementType, Interpreter, Model, Options, Tensor};

#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Classify a raw input buffer with a TensorFlow Lite model")]
#[command(version)]
struct Cli {
    /// Model file
    #[arg(long, default_value = "mnist_model.tflite")]
    model: String,

    /// Raw input buffer; its size must match the input tensor exactly
    input: String,

    /// Engine thread pool size
    #[arg(long, default_value_t = 1)]
    threads: i32,

    /// Number of classes to print
    #[arg(long, default_value_t = 3)]
    top: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    giztoy_tflite::install_default_engine()?;

    let model = Model::from_file(&cli.model)?;
    let mut options = Options::new();
    options.set_thread_count(cli.threads);
    let mut interp = Interpreter::new(&model, Some(options))?;
    interp.allocate_tensors()?;

    let data = fs::read(&cli.input).with_context(|| format!("reading {}", cli.input))?;
    let mut input = interp.input_mut(0)?;
    let qp = input.quantization();
    let shape = input.shape();
    let dtype = input.element_type()?;
    info!(
        shape = ?shape,
        dtype = ?dtype,
        scale = qp.scale,
        zero_point = qp.zero_point,
        "input tensor"
    );
    input.copy_from_buffer(&data)?;

    interp.invoke()?;

    let output = interp.output(0)?;
    let mut ranked: Vec<(usize, f64)> = scores_of(&output)?.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (class, score) in ranked.into_iter().take(cli.top) {
        println!("{class}\t{score:.6}");
    }
    Ok(())
}

/// Dequantizes the output into comparable scores.
fn scores_of(output: &Tensor<'_>) -> Result<Vec<f64>> {
    let qp = output.quantization();
    Ok(match output.element_type()? {
        ElementType::Float32 => output.as_f32()?.iter().map(|&v| v as f64).collect(),
        ElementType::UInt8 => {
            output.as_u8()?.iter().map(|&v| qp.dequantize(v as i64)).collect()
        }
        ElementType::Int8 => {
            output.as_i8()?.iter().map(|&v| qp.dequantize(v as i64)).collect()
        }
        other => bail!("unsupported output element type {other:?}"),
    })
}
