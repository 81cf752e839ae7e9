//! ONNX-exported YOLO detector.
//!
//! Wraps an `ort` session around a detection model exported to ONNX and turns
//! its raw `[1, 4 + classes, anchors]` output head into scored, deduplicated
//! boxes in original-image coordinates.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView3, Ix3};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};

use super::{BoundingBox, Detection};

/// Gray value used to pad the letterboxed input.
const PAD_COLOR: u8 = 114;

/// Detector settings that are fixed per loaded model.
#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    /// Square side length the model expects, in pixels.
    pub input_size: u32,
    /// IoU above which two same-class boxes are considered duplicates.
    pub iou_threshold: f32,
    /// Class names indexed by class id.
    pub class_names: Vec<String>,
}

impl Default for YoloDetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.7,
            class_names: vec!["polyp".to_string()],
        }
    }
}

/// A pretrained YOLO detection model loaded from an ONNX file.
///
/// Inference runs on CPU. The session sits behind a mutex, so one detector
/// can be shared across threads; calls are serialized.
pub struct YoloDetector {
    session: Mutex<Session>,
    input_name: String,
    config: YoloDetectorConfig,
}

impl std::fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloDetector")
            .field("input_name", &self.input_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl YoloDetector {
    /// Load a detection model from a filesystem path.
    pub fn load<P: AsRef<Path>>(model_path: P, config: YoloDetectorConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            anyhow::bail!("detection model not found: {}", model_path.display());
        }

        info!("loading detection model from {}", model_path.display());
        let session = Session::builder()
            .context("failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("failed to set execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model from {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());
        debug!("model input: {}", input_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            config,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.config.class_names
    }

    /// Run detection on an image, keeping boxes scoring at least `confidence`.
    ///
    /// Returned boxes are in the coordinate space of `image`. An empty vector
    /// means nothing was found, not a failure.
    pub fn detect(&self, image: &DynamicImage, confidence: f32) -> Result<Vec<Detection>> {
        let (orig_w, orig_h) = (image.width() as f32, image.height() as f32);
        let (input, letterbox) = preprocess(image, self.config.input_size);

        let input_value = Value::from_array(input).context("failed to create input tensor")?;
        let mut session = self.session.lock().unwrap();
        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("detection inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract output tensor")?;
        let output = output
            .into_dimensionality::<Ix3>()
            .context("unexpected output shape")?;

        let detections = decode(
            output.view(),
            confidence,
            self.config.iou_threshold,
            &letterbox,
            orig_w,
            orig_h,
        );
        debug!("kept {} detection(s)", detections.len());

        Ok(detections)
    }
}

/// Mapping between original-image and letterboxed coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_original(&self, value: f32, pad: f32, limit: f32) -> f32 {
        ((value - pad) / self.scale).clamp(0.0, limit)
    }
}

/// Resize with preserved aspect ratio onto a gray square canvas and convert
/// to a normalized NCHW tensor.
fn preprocess(image: &DynamicImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = (image.width(), image.height());
    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size);

    let resized = image
        .resize_exact(new_w, new_h, imageops::FilterType::Triangle)
        .to_rgb8();

    let pad_x = (input_size - new_w) / 2;
    let pad_y = (input_size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(input_size, input_size, image::Rgb([PAD_COLOR; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let size = input_size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Turn the raw `[1, 4 + classes, anchors]` head into thresholded,
/// deduplicated detections in original-image coordinates.
fn decode(
    output: ArrayView3<f32>,
    confidence: f32,
    iou_threshold: f32,
    letterbox: &Letterbox,
    orig_w: f32,
    orig_h: f32,
) -> Vec<Detection> {
    let classes = output.shape()[1].saturating_sub(4);
    let anchors = output.shape()[2];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for class in 0..classes {
            let score = output[[0, 4 + class, anchor]];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < confidence {
            continue;
        }

        let cx = output[[0, 0, anchor]];
        let cy = output[[0, 1, anchor]];
        let w = output[[0, 2, anchor]];
        let h = output[[0, 3, anchor]];

        candidates.push(Detection {
            bbox: BoundingBox {
                x1: letterbox.to_original(cx - w / 2.0, letterbox.pad_x, orig_w),
                y1: letterbox.to_original(cy - h / 2.0, letterbox.pad_y, orig_h),
                x2: letterbox.to_original(cx + w / 2.0, letterbox.pad_x, orig_w),
                y2: letterbox.to_original(cy + h / 2.0, letterbox.pad_y, orig_h),
            },
            class_index: best_class,
            confidence: best_score,
        });
    }

    non_max_suppression(candidates, iou_threshold)
}

/// Greedy per-class non-max suppression, highest confidence first.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for detection in detections {
        let duplicate = kept.iter().any(|existing| {
            existing.class_index == detection.class_index
                && existing.bbox.iou(&detection.bbox) > iou_threshold
        });
        if !duplicate {
            kept.push(detection);
        }
    }
    kept
}
