use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::warn;

use crate::{Detection, VisionError};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Annotation renderer: boxes plus a filled label tag per detection.
///
/// Box color cycles through a fixed palette by detection index. The label
/// font is loaded at runtime; without one, boxes are still drawn and label
/// text is skipped.
#[derive(Clone)]
pub struct Renderer {
    font: Option<FontArc>,
    font_scale: PxScale,
    palette: [Rgb<u8>; 6],
}

impl Renderer {
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|p| match std::fs::read(p) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("render: bad font {}: {}", p.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("render: cannot read font {}: {}", p.display(), e);
                None
            }
        });
        if font.is_none() {
            warn!("render: no label font loaded; annotations will omit label text");
        }

        Self {
            font,
            font_scale: PxScale::from(16.0),
            palette: [
                Rgb([255, 0, 0]),   // red
                Rgb([0, 160, 0]),   // green
                Rgb([0, 64, 255]),  // blue
                Rgb([230, 200, 0]), // yellow
                Rgb([160, 0, 200]), // purple
                Rgb([255, 128, 0]), // orange
            ],
        }
    }

    /// Draws `detections` over the image at `image_path` and writes the
    /// annotated copy to `output_path`.
    pub fn render(
        &self,
        image_path: &Path,
        detections: &[Detection],
        output_path: &Path,
    ) -> Result<(), VisionError> {
        let img = image::open(image_path)
            .map_err(|e| VisionError::Render(format!("open {}: {}", image_path.display(), e)))?;
        let mut canvas = img.to_rgb8();
        let (img_w, img_h) = canvas.dimensions();

        for (i, d) in detections.iter().enumerate() {
            let color = self.palette[i % self.palette.len()];

            let x = d.x.max(0.0) as i32;
            let y = d.y.max(0.0) as i32;
            let w = (d.w.min(img_w as f32 - d.x.max(0.0))) as u32;
            let h = (d.h.min(img_h as f32 - d.y.max(0.0))) as u32;
            if w == 0 || h == 0 {
                continue;
            }

            let rect = Rect::at(x, y).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, rect, color);
            // second border for visibility
            if w > 2 && h > 2 {
                let inner = Rect::at(x + 1, y + 1).of_size(w - 2, h - 2);
                draw_hollow_rect_mut(&mut canvas, inner, color);
            }

            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", d.class_name, d.conf);
                let (tw, th) = text_size(self.font_scale, font, &label);
                let tag_y = (y - th as i32).max(0);
                let tag = Rect::at(x, tag_y).of_size(tw.max(1), th.max(1));
                draw_filled_rect_mut(&mut canvas, tag, color);
                draw_text_mut(&mut canvas, WHITE, x, tag_y, self.font_scale, font, &label);
            }
        }

        canvas
            .save(output_path)
            .map_err(|e| VisionError::Render(format!("save {}: {}", output_path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection { class_id: 0, class_name: "vehicle".into(), conf: 0.9, x, y, w, h }
    }

    #[test]
    fn renders_boxes_without_a_font() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        let out = dir.path().join("out.png");
        RgbImage::new(64, 64).save(&src).unwrap();

        let renderer = Renderer::new(None);
        renderer.render(&src, &[det(10.0, 10.0, 20.0, 15.0)], &out).unwrap();

        let annotated = image::open(&out).unwrap().to_rgb8();
        assert_eq!(annotated.dimensions(), (64, 64));
        // palette color 0 is red; box outline must be present
        assert_eq!(annotated.get_pixel(10, 10), &Rgb([255, 0, 0]));
    }

    #[test]
    fn out_of_bounds_boxes_are_clipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        let out = dir.path().join("out.png");
        RgbImage::new(32, 32).save(&src).unwrap();

        let renderer = Renderer::new(None);
        renderer
            .render(&src, &[det(-5.0, -5.0, 100.0, 100.0), det(40.0, 40.0, 10.0, 10.0)], &out)
            .unwrap();
        assert!(out.exists());
    }

    #[test]
    fn missing_source_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(None);
        let err = renderer
            .render(&dir.path().join("nope.png"), &[], &dir.path().join("out.png"))
            .unwrap_err();
        assert!(matches!(err, VisionError::Render(_)));
    }
}
