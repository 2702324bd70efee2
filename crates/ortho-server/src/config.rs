use anyhow::{Context, Result};
use ortho_proto::DetectionSettings;
use ortho_vision::VisionConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub vision: VisionConfig,
    #[serde(default)]
    pub detect: DetectConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Startup DetectionSettings; replaced at runtime by the settings endpoint.
    #[serde(default)]
    pub defaults: DetectionSettings,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self { timeout_secs: default_timeout_secs(), defaults: DetectionSettings::default() }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

pub fn load(path: &str) -> Result<ServerConfig> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [http]
        bind = "127.0.0.1:8000"

        [storage]
        data_dir = "/tmp/orthoscan"

        [vision]
        img_w = 512
        img_h = 512
        num_classes = 2
        class_names = ["vehicle", "building"]
        nms_iou_threshold = 0.5
        max_detections = 300
        output_layout = "ultralytics"

        [vision.models]
        visible = "models/visible.onnx"
    "#;

    #[test]
    fn minimal_config_parses_with_detect_defaults() {
        let cfg: ServerConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.detect.timeout_secs, 120);
        assert_eq!(cfg.detect.defaults, DetectionSettings::default());
        assert_eq!(cfg.vision.models["visible"], "models/visible.onnx");
        assert!(cfg.http.allowed_origins.is_empty());
    }

    #[test]
    fn detect_section_overrides_are_partial() {
        let toml_src = format!(
            "{MINIMAL}\n[detect]\ntimeout_secs = 30\n[detect.defaults]\nconfidence_threshold = 0.25\n"
        );
        let cfg: ServerConfig = toml::from_str(&toml_src).unwrap();
        assert_eq!(cfg.detect.timeout_secs, 30);
        assert_eq!(cfg.detect.defaults.confidence_threshold, 0.25);
        // untouched fields keep their defaults
        assert_eq!(cfg.detect.defaults.slice_size, 512);
        assert_eq!(cfg.detect.defaults.model_variant, "visible");
    }
}
