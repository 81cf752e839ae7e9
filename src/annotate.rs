//! Bounding-box and label rendering.

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use crate::detect::Detection;

/// Box colors, picked by `class_index % PALETTE.len()`.
pub const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
];

const BOX_WIDTH: i32 = 3;
const LABEL_SCALE: f32 = 20.0;

/// System fonts tried for labels, in order.
const FONT_PATHS: [&str; 2] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
];

pub fn class_color(class_index: usize) -> Rgb<u8> {
    PALETTE[class_index % PALETTE.len()]
}

/// Load a system font for labels. When none is found, boxes are drawn
/// without labels rather than failing.
pub fn load_label_font() -> Option<FontVec> {
    for path in FONT_PATHS {
        if let Ok(data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(data) {
                debug!("label font: {path}");
                return Some(font);
            }
        }
    }
    debug!("no label font available, drawing boxes only");
    None
}

/// Draw detections onto a copy of `image`; the input is never mutated.
///
/// Each box gets a 3 px outline in its class color. With a font, a
/// `"name confidence"` label is drawn in white on a filled background above
/// the box.
pub fn draw_detections(
    image: &DynamicImage,
    detections: &[Detection],
    class_names: &[String],
    font: Option<&FontVec>,
) -> RgbImage {
    let mut canvas = image.to_rgb8();

    for detection in detections {
        let color = class_color(detection.class_index);
        let x = detection.bbox.x1.round() as i32;
        let y = detection.bbox.y1.round() as i32;
        let width = detection.bbox.width().round() as u32;
        let height = detection.bbox.height().round() as u32;
        if width == 0 || height == 0 {
            continue;
        }

        for inset in 0..BOX_WIDTH {
            let w = width as i32 - 2 * inset;
            let h = height as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(x + inset, y + inset).of_size(w as u32, h as u32),
                color,
            );
        }

        if let Some(font) = font {
            let name = class_names
                .get(detection.class_index)
                .map(String::as_str)
                .unwrap_or("object");
            let label = format!("{} {:.2}", name, detection.confidence);
            let scale = PxScale::from(LABEL_SCALE);
            let (text_w, text_h) = text_size(scale, font, &label);

            let label_y = (y - text_h as i32 - 4).max(0);
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(x, label_y).of_size(text_w + 4, text_h + 4),
                color,
            );
            draw_text_mut(
                &mut canvas,
                Rgb([255, 255, 255]),
                x + 2,
                label_y + 2,
                scale,
                font,
                &label,
            );
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32, class_index: usize) -> Detection {
        Detection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            class_index,
            confidence: 0.9,
        }
    }

    #[test]
    fn palette_wraps_around() {
        assert_eq!(class_color(0), PALETTE[0]);
        assert_eq!(class_color(5), PALETTE[5]);
        assert_eq!(class_color(6), PALETTE[0]);
        assert_eq!(class_color(13), PALETTE[1]);
    }

    #[test]
    fn drawing_preserves_dimensions() {
        let image = DynamicImage::new_rgb8(120, 80);
        let detections = vec![detection(10.0, 10.0, 60.0, 50.0, 0)];

        let annotated = draw_detections(&image, &detections, &["polyp".to_string()], None);

        assert_eq!(annotated.width(), 120);
        assert_eq!(annotated.height(), 80);
    }

    #[test]
    fn box_outline_uses_class_color() {
        let image = DynamicImage::new_rgb8(100, 100);
        let detections = vec![detection(20.0, 20.0, 70.0, 70.0, 1)];

        let annotated = draw_detections(&image, &detections, &[], None);

        assert_eq!(*annotated.get_pixel(20, 20), PALETTE[1]);
        assert_eq!(*annotated.get_pixel(45, 20), PALETTE[1]);
        // Inside the box the original pixels survive.
        assert_eq!(*annotated.get_pixel(45, 45), Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let image = DynamicImage::new_rgb8(50, 50);
        let detections = vec![detection(10.0, 10.0, 10.0, 40.0, 0)];

        let annotated = draw_detections(&image, &detections, &[], None);

        assert!(annotated.pixels().all(|pixel| *pixel == Rgb([0, 0, 0])));
    }
}
