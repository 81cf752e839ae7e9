//! Detection results and summary statistics.

use serde::Serialize;

pub mod yolo;

pub use yolo::{YoloDetector, YoloDetectorConfig};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A single detected object.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_index: usize,
    pub confidence: f32,
}

/// Aggregate for one detected class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassSummary {
    pub name: String,
    pub count: usize,
    pub mean_confidence: f32,
}

/// Summary statistics over one detection run, grouped per class in
/// first-seen order.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub total: usize,
    pub classes: Vec<ClassSummary>,
}

impl DetectionSummary {
    pub fn new(detections: &[Detection], class_names: &[String]) -> Self {
        let mut groups: Vec<(usize, usize, f32)> = Vec::new();
        for detection in detections {
            match groups
                .iter_mut()
                .find(|(index, _, _)| *index == detection.class_index)
            {
                Some((_, count, sum)) => {
                    *count += 1;
                    *sum += detection.confidence;
                }
                None => groups.push((detection.class_index, 1, detection.confidence)),
            }
        }

        let classes = groups
            .into_iter()
            .map(|(index, count, sum)| ClassSummary {
                name: class_names
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("class {index}")),
                count,
                mean_confidence: sum / count as f32,
            })
            .collect();

        Self {
            total: detections.len(),
            classes,
        }
    }

    /// True when nothing was detected. Reported as information, not an error.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
