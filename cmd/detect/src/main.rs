//! Detection pipeline demo.
//!
//! A worker thread owns the interpreter and runs capture + inference; the
//! main thread consumes results over a bounded channel and applies the
//! score threshold, ranking, and label mapping. The channel holds one
//! result: while it is full the worker drops freshly inferred frames
//! instead of queueing them, so the consumer always sees a recent one.
//!
//! Frames are synthesized in-process; camera capture is out of scope and
//! would slot in where [`synthesize_frame`] is called.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use giztoy_tflite::{Delegate, ElementType, Interpreter, Model, Options, Tensor, accelerator};

#[derive(Parser)]
#[command(name = "detect")]
#[command(about = "Run an SSD-style detection model over synthesized frames")]
#[command(version)]
struct Cli {
    /// Model file
    #[arg(long, default_value = "detect.tflite")]
    model: String,

    /// Label file, one label per line
    #[arg(long, default_value = "labels.txt")]
    labels: String,

    /// Frames to process before shutting down
    #[arg(long, default_value_t = 64)]
    frames: usize,

    /// Minimum score for a detection to be shown
    #[arg(long, default_value_t = 0.6)]
    threshold: f64,

    /// Attach an accelerator delegate
    #[arg(long)]
    accelerator: bool,

    /// Accelerator runtime verbosity
    #[arg(long, default_value_t = 0)]
    verbosity: i32,

    /// Engine thread pool size
    #[arg(long, default_value_t = 4)]
    threads: i32,
}

struct Detections {
    frame: usize,
    boxes: Vec<[f32; 4]>,
    classes: Vec<f32>,
    scores: Vec<f32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    giztoy_tflite::install_default_engine()?;

    let labels = load_labels(&cli.labels)?;
    let model = Model::from_file(&cli.model)?;

    let mut options = Options::new();
    options.set_thread_count(cli.threads);
    // The delegate handle stays alive on this side too; the interpreter
    // keeps its own clone either way.
    let _delegate = if cli.accelerator {
        let devices = accelerator::devices()?;
        if devices.is_empty() {
            bail!("no accelerator devices found");
        }
        let version = accelerator::version()?;
        info!(version = %version, "accelerator runtime");
        accelerator::set_verbosity(cli.verbosity)?;
        let delegate = Delegate::accelerator(&devices[0])?;
        options.add_delegate(&delegate);
        Some(delegate)
    } else {
        None
    };

    let mut interp = Interpreter::new(&model, Some(options))?;
    interp.allocate_tensors()?;

    let input = interp.input(0)?;
    let (height, width, channels) =
        (input.dim(1) as u64, input.dim(2) as u64, input.dim(3) as u64);
    let frame_len = input.byte_size();
    let qp = input.quantization();
    let dtype = input.element_type()?;
    info!(
        width,
        height,
        channels,
        dtype = ?dtype,
        scale = qp.scale,
        zero_point = qp.zero_point,
        "input tensor"
    );
    info!(
        inputs = interp.input_tensor_count() as u64,
        outputs = interp.output_tensor_count() as u64,
        "tensor counts"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::sync_channel::<Detections>(1);

    let worker = {
        let stop = Arc::clone(&stop);
        let frames = cli.frames;
        thread::spawn(move || -> Result<()> {
            for frame in 0..frames {
                // Cancellation means not issuing the next invoke; a running
                // invoke is never interrupted.
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let pixels = synthesize_frame(frame, frame_len);
                interp.input_mut(0)?.copy_from_buffer(&pixels)?;
                interp.invoke()?;

                match tx.try_send(read_detections(&interp, frame)?) {
                    Ok(()) => {}
                    // Consumer still busy: drop this frame and move on.
                    Err(TrySendError::Full(_)) => continue,
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(())
        })
    };

    let started = Instant::now();
    let mut shown = 0usize;
    while let Ok(result) = rx.recv() {
        render(&result, &labels, cli.threshold);
        shown += 1;
        if shown >= cli.frames {
            stop.store(true, Ordering::Relaxed);
            break;
        }
    }
    drop(rx);

    match worker.join() {
        Ok(outcome) => outcome?,
        Err(_) => bail!("worker thread panicked"),
    }
    info!(
        frames = shown as u64,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline finished"
    );
    Ok(())
}

fn load_labels(path: &str) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("reading {path}"))?;
    let labels: Vec<String> = BufReader::new(file).lines().collect::<std::io::Result<_>>()?;
    Ok(labels)
}

/// Stand-in for camera capture: a moving gradient, stable per frame index.
fn synthesize_frame(frame: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + frame * 7) % 251) as u8).collect()
}

/// Reads the four SSD postprocess outputs: boxes, classes, scores, count.
fn read_detections(interp: &Interpreter, frame: usize) -> Result<Detections> {
    if interp.output_tensor_count() < 4 {
        bail!("detection models expose boxes/classes/scores/count outputs");
    }
    let boxes_raw = tensor_f32(&interp.output(0)?)?;
    let classes = tensor_f32(&interp.output(1)?)?;
    let scores = tensor_f32(&interp.output(2)?)?;
    let count = tensor_f32(&interp.output(3)?)?;

    let count = (count.first().copied().unwrap_or(0.0) as usize)
        .min(classes.len())
        .min(scores.len())
        .min(boxes_raw.len() / 4);
    let boxes = boxes_raw[..count * 4]
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    Ok(Detections {
        frame,
        boxes,
        classes: classes[..count].to_vec(),
        scores: scores[..count].to_vec(),
    })
}

fn tensor_f32(tensor: &Tensor<'_>) -> Result<Vec<f32>> {
    let qp = tensor.quantization();
    Ok(match tensor.element_type()? {
        ElementType::Float32 => tensor.as_f32()?.to_vec(),
        ElementType::UInt8 => {
            tensor.as_u8()?.iter().map(|&v| qp.dequantize(v as i64) as f32).collect()
        }
        other => bail!("unsupported output element type {other:?}"),
    })
}

fn render(result: &Detections, labels: &[String], threshold: f64) {
    let mut ranked: Vec<(usize, f64)> = result
        .scores
        .iter()
        .enumerate()
        .map(|(i, &s)| (i, s as f64))
        .filter(|&(_, s)| s >= threshold)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(5);

    for (i, score) in ranked {
        let class = result.classes[i] as usize;
        let label = labels.get(class).map(String::as_str).unwrap_or("unknown");
        let b = result.boxes[i];
        println!(
            "frame {:>4}  {label:<16} {score:.3}  [{:.2} {:.2} {:.2} {:.2}]",
            result.frame, b[0], b[1], b[2], b[3]
        );
    }
}
