use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use polypscan::annotate;
use polypscan::detect::{DetectionSummary, YoloDetector, YoloDetectorConfig};
use polypscan::server::{self, AppState};

#[derive(Parser)]
#[command(name = "polypscan")]
#[command(about = "Detect polyps in endoscopic images with a pretrained YOLO model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect objects in one image and write an annotated copy
    Detect(DetectArgs),
    /// Serve the detector over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// Path to the input image
    image: PathBuf,

    /// Path to the exported ONNX detection model
    #[arg(short, long)]
    model: PathBuf,

    /// Confidence threshold in [0, 1]
    #[arg(short, long, default_value_t = 0.25)]
    confidence: f32,

    /// IoU threshold for non-max suppression
    #[arg(long, default_value_t = 0.7)]
    iou: f32,

    /// File with one class name per line (defaults to "polyp")
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Where to write the annotated image (defaults next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print detections and summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ServeArgs {
    /// Path to the exported ONNX detection model
    #[arg(short, long)]
    model: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Default confidence threshold in [0, 1]
    #[arg(short, long, default_value_t = 0.25)]
    confidence: f32,

    /// IoU threshold for non-max suppression
    #[arg(long, default_value_t = 0.7)]
    iou: f32,

    /// File with one class name per line (defaults to "polyp")
    #[arg(long)]
    classes: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Detect(args) => detect(args),
        Command::Serve(args) => serve(args).await,
    }
}

fn detector_config(classes: Option<&PathBuf>, iou: f32) -> Result<YoloDetectorConfig> {
    let mut config = YoloDetectorConfig {
        iou_threshold: iou,
        ..Default::default()
    };
    if let Some(path) = classes {
        let names = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        config.class_names = names
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        anyhow::ensure!(
            !config.class_names.is_empty(),
            "class file {} is empty",
            path.display()
        );
    }
    Ok(config)
}

fn detect(args: DetectArgs) -> Result<()> {
    let confidence = args.confidence.clamp(0.0, 1.0);
    let image = image::ImageReader::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .decode()
        .context("failed to decode image")?;

    let detector = YoloDetector::load(&args.model, detector_config(args.classes.as_ref(), args.iou)?)?;
    let detections = detector.detect(&image, confidence)?;
    let summary = DetectionSummary::new(&detections, detector.class_names());

    let annotated = annotate::draw_detections(
        &image,
        &detections,
        detector.class_names(),
        annotate::load_label_font().as_ref(),
    );
    let output = args.output.unwrap_or_else(|| default_output(&args.image));
    annotated
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("annotated image written to {}", output.display());

    if args.json {
        let report = serde_json::json!({
            "detections": detections,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if summary.is_empty() {
        println!("No objects detected");
    } else {
        println!("Detected {} object(s)", summary.total);
        for class in &summary.classes {
            println!(
                "- {}: {} (average confidence {:.1}%)",
                class.name,
                class.count,
                class.mean_confidence * 100.0
            );
        }
    }
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    input.with_file_name(format!("{stem}_annotated.png"))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let detector = YoloDetector::load(&args.model, detector_config(args.classes.as_ref(), args.iou)?)?;
    let state = Arc::new(AppState {
        detector,
        confidence: args.confidence.clamp(0.0, 1.0),
        font: annotate::load_label_font(),
    });
    server::serve(state, args.port).await
}
