use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use speedtrap_rs::pipeline::{Frame, JsonLinesSink, PipelineConfig, ReplayDetector, ViolationPipeline};
use speedtrap_rs::speed::CalibrationModel;

#[derive(Parser, Debug)]
#[command(author, version, about = "Vehicle speed violation detection", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fits the pixel-to-real speed model and writes it as JSON
    Calibrate {
        /// Pixels per meter in the native frame
        #[arg(long, default_value_t = 34.3)]
        pixels_per_meter: f64,
        /// Native frame width the constant was measured at
        #[arg(long)]
        reference_width: Option<u32>,
        #[arg(short, long, default_value = "models/speed_calibration.json")]
        output: PathBuf,
    },
    /// Replays recorded detections through the violation pipeline
    Run {
        /// YAML pipeline config, defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON-lines detections, one record per detection
        #[arg(short, long)]
        detections: PathBuf,
        /// JSON-lines violation output
        #[arg(short, long, default_value = "violations.jsonl")]
        output: PathBuf,
        /// Named speed limit preset from the config, e.g. urban, rural, highway
        #[arg(long)]
        speed_limit: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Calibrate {
            pixels_per_meter,
            reference_width,
            output,
        } => calibrate(pixels_per_meter, reference_width, output),
        Command::Run {
            config,
            detections,
            output,
            speed_limit,
        } => run(config, detections, output, speed_limit),
    }
}

fn calibrate(pixels_per_meter: f64, reference_width: Option<u32>, output: PathBuf) -> Result<()> {
    let mut model = CalibrationModel::from_pixels_per_meter(pixels_per_meter)
        .context("can't fit calibration model")?;
    if let Some(width) = reference_width {
        model = model.with_reference_width(width);
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("can't create {}", parent.display()))?;
    }
    model
        .save(&output)
        .with_context(|| format!("can't write {}", output.display()))?;
    info!(path = %output.display(), slope = model.slope, intercept = model.intercept, "calibration saved");
    Ok(())
}

fn run(
    config: Option<PathBuf>,
    detections: PathBuf,
    output: PathBuf,
    speed_limit: Option<String>,
) -> Result<()> {
    let config = match config {
        Some(path) => PipelineConfig::load(&path).with_context(|| format!("bad config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let replay = ReplayDetector::open(&detections)
        .with_context(|| format!("can't read detections {}", detections.display()))?;
    let last_frame = replay.last_frame().unwrap_or(0);
    let sink = JsonLinesSink::open(&output)
        .with_context(|| format!("can't open violation output {}", output.display()))?;
    let mut pipeline = ViolationPipeline::from_config(config, Box::new(replay), Box::new(sink))
        .context("pipeline can't start")?;
    if let Some(name) = speed_limit {
        pipeline
            .select_speed_limit(&name)
            .with_context(|| format!("can't apply speed limit {}", name))?;
    }

    // Trailing empty frames let tracks leave the region and expire
    let tail = pipeline.config().tracker.max_age as u64 + 1;
    let raised = pipeline.run((0..=last_frame + tail).map(Frame::without_image));
    let summary = pipeline.shutdown();
    info!(violations = raised, output = %output.display(), "replay finished");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
