use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::execution_providers::CPUExecutionProvider;
#[cfg(feature = "cuda")]
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use tracing::{debug, info};

use crate::{
    merge_filter, postprocess_ultralytics, tile_plan, to_tile_space, Detect, Detection,
    VisionConfig, VisionError,
};

/// Detection adapter over an ONNX session. One instance per loaded model;
/// callers are responsible for serializing access (the session is a single
/// shared accelerator resource).
pub struct OnnxDetector {
    session: Session,
    cfg: VisionConfig,
    settings: SettingsSnapshot,
    input_name: String,
    output_name: String,
    gpu: bool,
}

/// The slice of DetectionSettings the adapter needs, snapshotted at load so
/// a detector and the settings it was built with cannot drift apart.
#[derive(Debug, Clone)]
struct SettingsSnapshot {
    variant: String,
    confidence_threshold: f32,
    slice_size: u32,
    overlap_ratio: f32,
}

impl OnnxDetector {
    /// Builds a session for the requested model variant. Accelerator is used
    /// when available (cuda feature + runtime probe), else CPU.
    pub fn load(
        cfg: &VisionConfig,
        variant: &str,
        confidence_threshold: f32,
        slice_size: u32,
        overlap_ratio: f32,
    ) -> Result<Self, VisionError> {
        if cfg.output_layout != "ultralytics" {
            return Err(VisionError::ModelLoad(format!(
                "unsupported output_layout: {}",
                cfg.output_layout
            )));
        }

        let model_path = cfg
            .models
            .get(variant)
            .ok_or_else(|| VisionError::ModelLoad(format!("unknown model variant: {}", variant)))?;
        if !Path::new(model_path).exists() {
            return Err(VisionError::ModelLoad(format!("weights not found: {}", model_path)));
        }

        #[cfg(feature = "cuda")]
        let gpu = CUDAExecutionProvider::default().is_available().unwrap_or(false);
        #[cfg(not(feature = "cuda"))]
        let gpu = false;

        let load_err = |e: ort::Error| VisionError::ModelLoad(e.to_string());

        let builder = Session::builder().map_err(load_err)?;
        #[cfg(feature = "cuda")]
        let builder = if gpu {
            builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(load_err)?
        } else {
            builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .map_err(load_err)?
        };
        #[cfg(not(feature = "cuda"))]
        let builder = builder
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(load_err)?;

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .commit_from_file(model_path)
            .map_err(load_err)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| VisionError::ModelLoad("model has no outputs".into()))?;

        info!(
            "vision: loaded {} model from {} (device: {})",
            variant,
            model_path,
            if gpu { "cuda" } else { "cpu" }
        );

        Ok(Self {
            session,
            cfg: cfg.clone(),
            settings: SettingsSnapshot {
                variant: variant.to_string(),
                confidence_threshold,
                slice_size,
                overlap_ratio,
            },
            input_name,
            output_name,
            gpu,
        })
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu
    }

    pub fn variant(&self) -> &str {
        &self.settings.variant
    }

    fn class_name(&self, id: usize) -> String {
        self.cfg
            .class_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", id))
    }

    /// Runs the net on one tile; returns detections in tile pixel space.
    fn run_tile(&mut self, tile: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let (tile_w, tile_h) = (tile.width() as f32, tile.height() as f32);
        let resized = imageops::resize(tile, self.cfg.img_w, self.cfg.img_h, FilterType::Triangle);

        let (nw, nh) = (self.cfg.img_w as usize, self.cfg.img_h as usize);
        let mut input = Array4::<f32>::zeros((1, 3, nh, nw));
        for (x, y, px) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = px[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = px[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = px[2] as f32 / 255.0;
        }

        let inf_err = |e: ort::Error| VisionError::Inference(e.to_string());

        let input = input.as_standard_layout();
        let tensor = TensorRef::from_array_view(&input).map_err(inf_err)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(inf_err)?;
        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| VisionError::Inference(format!("output '{}' missing", self.output_name)))?;
        let (shape, data) = output.try_extract_tensor::<f32>().map_err(inf_err)?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let (num_preds, stride) = match dims.as_slice() {
            [1, n, s] => (*n, *s),
            [n, s] => (*n, *s),
            other => {
                return Err(VisionError::Inference(format!(
                    "unexpected output dims {:?}",
                    other
                )))
            }
        };
        let expected = 5 + self.cfg.num_classes;
        if stride != expected {
            return Err(VisionError::Inference(format!(
                "output stride mismatch: got {}, expected {}",
                stride, expected
            )));
        }

        let preds =
            postprocess_ultralytics(data, num_preds, self.cfg.num_classes, self.settings.confidence_threshold);
        drop(outputs);

        // Predictions come back in net-input pixel units; rescale to the
        // tile's own size before the caller offsets into image space.
        let (net_w, net_h) = (self.cfg.img_w as f32, self.cfg.img_h as f32);
        Ok(preds
            .into_iter()
            .map(|p| {
                let (x, y, w, h) = to_tile_space(&p, net_w, net_h, tile_w, tile_h);
                Detection {
                    class_id: p.class_id,
                    class_name: self.class_name(p.class_id),
                    conf: p.conf,
                    x,
                    y,
                    w,
                    h,
                }
            })
            .collect())
    }
}

impl Detect for OnnxDetector {
    /// Slicing inference: overlapping tiles, per-tile inference, greedy IoU
    /// merge of the combined predictions back in original-image space.
    fn detect(&mut self, path: &Path) -> Result<Vec<Detection>, VisionError> {
        if !path.exists() {
            return Err(VisionError::NotFound(path.display().to_string()));
        }

        let img = image::open(path)
            .map_err(|e| VisionError::Image(format!("decode {}: {}", path.display(), e)))?;
        let rgb = img.to_rgb8();
        let (img_w, img_h) = rgb.dimensions();

        let tiles = tile_plan(img_w, img_h, self.settings.slice_size, self.settings.overlap_ratio);
        debug!("vision: {} -> {} tile(s)", path.display(), tiles.len());

        let mut all = Vec::new();
        for t in &tiles {
            let tile = imageops::crop_imm(&rgb, t.x, t.y, t.w, t.h).to_image();
            for mut d in self.run_tile(&tile)? {
                d.x += t.x as f32;
                d.y += t.y as f32;
                all.push(d);
            }
        }

        let mut merged = merge_filter(all, self.cfg.nms_iou_threshold, self.cfg.max_detections);
        for d in &mut merged {
            d.x = d.x.clamp(0.0, img_w as f32);
            d.y = d.y.clamp(0.0, img_h as f32);
            d.w = d.w.max(0.0).min(img_w as f32 - d.x);
            d.h = d.h.max(0.0).min(img_h as f32 - d.y);
        }
        Ok(merged)
    }
}
