//! End-to-end checks of the annotation pipeline without a model: synthetic
//! detections are drawn, saved, reloaded and summarized the way the CLI and
//! the HTTP endpoint do it.

use image::{DynamicImage, Rgb};
use polypscan::annotate::{self, PALETTE};
use polypscan::detect::{BoundingBox, Detection, DetectionSummary};

fn synthetic_detections() -> Vec<Detection> {
    vec![
        Detection {
            bbox: BoundingBox {
                x1: 20.0,
                y1: 30.0,
                x2: 120.0,
                y2: 110.0,
            },
            class_index: 0,
            confidence: 0.91,
        },
        Detection {
            bbox: BoundingBox {
                x1: 160.0,
                y1: 40.0,
                x2: 220.0,
                y2: 100.0,
            },
            class_index: 0,
            confidence: 0.55,
        },
    ]
}

#[test]
fn annotated_image_survives_a_save_and_reload() {
    let image = DynamicImage::new_rgb8(256, 192);
    let names = vec!["polyp".to_string()];

    let annotated = annotate::draw_detections(&image, &synthetic_detections(), &names, None);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("annotated.png");
    annotated.save(&path).unwrap();

    let reloaded = image::ImageReader::open(&path).unwrap().decode().unwrap();
    assert_eq!(reloaded.width(), 256);
    assert_eq!(reloaded.height(), 192);

    // Box outlines survive the round trip.
    let reloaded = reloaded.to_rgb8();
    assert_eq!(*reloaded.get_pixel(20, 30), PALETTE[0]);
    assert_eq!(*reloaded.get_pixel(160, 40), PALETTE[0]);
    // Untouched background stays black.
    assert_eq!(*reloaded.get_pixel(250, 185), Rgb([0, 0, 0]));
}

#[test]
fn summary_serializes_like_the_http_response() {
    let names = vec!["polyp".to_string()];
    let summary = DetectionSummary::new(&synthetic_detections(), &names);

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["total"], 2);
    assert_eq!(value["classes"][0]["name"], "polyp");
    assert_eq!(value["classes"][0]["count"], 2);
    let mean = value["classes"][0]["mean_confidence"].as_f64().unwrap();
    assert!((mean - 0.73).abs() < 1e-6);
}

#[test]
fn detections_serialize_with_box_coordinates() {
    let value = serde_json::to_value(synthetic_detections()).unwrap();
    assert_eq!(value[0]["class_index"], 0);
    assert_eq!(value[0]["bbox"]["x1"], 20.0);
    assert_eq!(value[1]["bbox"]["y2"], 100.0);
}
