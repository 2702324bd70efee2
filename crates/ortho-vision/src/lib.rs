mod nms;
mod slice;
pub mod detector;
pub mod render;

use serde::Deserialize;
use std::path::Path;

pub use detector::OnnxDetector;
pub use nms::merge_filter;
pub use render::Renderer;
pub use slice::{tile_plan, TileRect};

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("render failed: {0}")]
    Render(String),
}

/// One detection in original-image pixel space. x/y is the top-left corner.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub conf: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Model variant name -> ONNX weights path.
    pub models: std::collections::HashMap<String, String>,
    pub img_w: u32,
    pub img_h: u32,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub output_layout: String, // "ultralytics"
    pub font_path: Option<String>,
}

/// Detector seam; the orchestrator is generic over it so the batch pipeline
/// can be exercised without model weights.
pub trait Detect: Send {
    fn detect(&mut self, path: &Path) -> Result<Vec<Detection>, VisionError>;
}

/// Raw prediction with center/size coordinates in net-input pixel units
/// (0..img_w / 0..img_h), as YOLO-family exports emit them.
#[derive(Debug, Clone, Copy)]
pub struct RawPred {
    pub class_id: usize,
    pub conf: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// Projects a net-input-space box onto a tile of the given size. Returns
/// top-left x/y plus width/height in tile pixels.
pub fn to_tile_space(
    p: &RawPred,
    net_w: f32,
    net_h: f32,
    tile_w: f32,
    tile_h: f32,
) -> (f32, f32, f32, f32) {
    let sx = tile_w / net_w;
    let sy = tile_h / net_h;
    ((p.cx - p.w / 2.0) * sx, (p.cy - p.h / 2.0) * sy, p.w * sx, p.h * sy)
}

/// Ultralytics common export: per prediction [cx, cy, w, h, obj, cls0..].
pub fn postprocess_ultralytics(
    raw: &[f32],
    num_preds: usize,
    num_classes: usize,
    conf_th: f32,
) -> Vec<RawPred> {
    let stride = 5 + num_classes;
    let mut out = Vec::new();

    for i in 0..num_preds {
        let base = i * stride;
        if base + stride > raw.len() { break; }
        let cx = raw[base];
        let cy = raw[base + 1];
        let w = raw[base + 2];
        let h = raw[base + 3];
        let obj = raw[base + 4];

        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for c in 0..num_classes {
            let p = raw[base + 5 + c];
            if p > best_p { best_p = p; best_c = c; }
        }
        let conf = obj * best_p;
        if conf >= conf_th {
            out.push(RawPred { class_id: best_c, conf, cx, cy, w, h });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postprocess_keeps_best_class_above_threshold() {
        // two classes, stride 7; first pred passes, second is below threshold
        let raw = [
            0.5, 0.5, 0.2, 0.1, 0.9, 0.1, 0.8, // conf = 0.9 * 0.8 = 0.72, class 1
            0.3, 0.3, 0.1, 0.1, 0.4, 0.5, 0.2, // conf = 0.4 * 0.5 = 0.2
        ];
        let preds = postprocess_ultralytics(&raw, 2, 2, 0.5);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].class_id, 1);
        assert!((preds[0].conf - 0.72).abs() < 1e-6);
    }

    #[test]
    fn postprocess_ignores_truncated_tail() {
        let raw = [0.5, 0.5, 0.2, 0.1, 0.9, 1.0]; // shorter than one stride
        assert!(postprocess_ultralytics(&raw, 1, 2, 0.1).is_empty());
    }

    #[test]
    fn tile_projection_rescales_from_net_input_pixels() {
        let p = RawPred { class_id: 0, conf: 0.9, cx: 256.0, cy: 256.0, w: 100.0, h: 50.0 };
        let (x, y, w, h) = to_tile_space(&p, 512.0, 512.0, 512.0, 512.0);
        assert_eq!((x, y, w, h), (206.0, 231.0, 100.0, 50.0));

        // half-size tile halves every coordinate
        let (x, y, w, h) = to_tile_space(&p, 512.0, 512.0, 256.0, 256.0);
        assert_eq!((x, y, w, h), (103.0, 115.5, 50.0, 25.0));
    }

    #[test]
    fn tile_projection_keeps_boxes_inside_the_tile() {
        // a box near the net edge must land near the tile edge, not past it
        let p = RawPred { class_id: 0, conf: 0.9, cx: 500.0, cy: 500.0, w: 20.0, h: 20.0 };
        let (x, y, w, h) = to_tile_space(&p, 512.0, 512.0, 384.0, 384.0);
        assert!(x + w <= 384.0 + 1e-3);
        assert!(y + h <= 384.0 + 1e-3);
        assert!(x > 300.0 && y > 300.0);
    }
}
