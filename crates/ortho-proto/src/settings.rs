use serde::{Deserialize, Serialize};

/// Process-wide detection configuration. Created once at startup from the
/// config file defaults, read by every detection call, and replaced
/// wholesale by the settings endpoint (which also reloads the model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub model_variant: String,
    pub confidence_threshold: f32,
    pub slice_size: u32,
    pub overlap_ratio: f32,
    pub georeference: bool,
    pub pixel_size: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_variant: "visible".into(),
            confidence_threshold: 0.5,
            slice_size: 512,
            overlap_ratio: 0.3,
            georeference: false,
            pixel_size: 5.0,
        }
    }
}

impl DetectionSettings {
    /// Merged copy with the update's fields applied on top of `self`.
    pub fn apply(&self, update: &SettingsUpdate) -> Self {
        Self {
            model_variant: update.model_variant.clone().unwrap_or_else(|| self.model_variant.clone()),
            confidence_threshold: update.confidence_threshold.unwrap_or(self.confidence_threshold),
            slice_size: update.slice_size.unwrap_or(self.slice_size),
            overlap_ratio: update.overlap_ratio.unwrap_or(self.overlap_ratio),
            georeference: update.georeference.unwrap_or(self.georeference),
            pixel_size: update.pixel_size.unwrap_or(self.pixel_size),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!("confidence_threshold out of range: {}", self.confidence_threshold));
        }
        if self.slice_size == 0 {
            return Err("slice_size must be positive".into());
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(format!("overlap_ratio out of range: {}", self.overlap_ratio));
        }
        if self.pixel_size <= 0.0 {
            return Err(format!("pixel_size must be positive: {}", self.pixel_size));
        }
        Ok(())
    }
}

/// Partial settings update. Field aliases keep compatibility with the wire
/// names used by existing clients (`detectionLimit`, `pixelSize`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, alias = "modelType")]
    pub model_variant: Option<String>,
    #[serde(default, alias = "detectionLimit")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, alias = "sliceSize")]
    pub slice_size: Option<u32>,
    #[serde(default, alias = "overlapRatio")]
    pub overlap_ratio: Option<f32>,
    #[serde(default)]
    pub georeference: Option<bool>,
    #[serde(default, alias = "pixelSize")]
    pub pixel_size: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingsRequest {
    pub settings: SettingsUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_merges_only_present_fields() {
        let base = DetectionSettings::default();
        let update = SettingsUpdate {
            confidence_threshold: Some(0.7),
            georeference: Some(true),
            ..Default::default()
        };
        let merged = base.apply(&update);
        assert_eq!(merged.confidence_threshold, 0.7);
        assert!(merged.georeference);
        assert_eq!(merged.model_variant, base.model_variant);
        assert_eq!(merged.slice_size, base.slice_size);
    }

    #[test]
    fn update_accepts_legacy_wire_aliases() {
        let body = r#"{"settings":{"detectionLimit":0.65,"georeference":true,"pixelSize":2.5}}"#;
        let req: UpdateSettingsRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.settings.confidence_threshold, Some(0.65));
        assert_eq!(req.settings.georeference, Some(true));
        assert_eq!(req.settings.pixel_size, Some(2.5));
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut s = DetectionSettings::default();
        s.confidence_threshold = 1.5;
        assert!(s.validate().is_err());

        let mut s = DetectionSettings::default();
        s.overlap_ratio = 1.0;
        assert!(s.validate().is_err());

        let mut s = DetectionSettings::default();
        s.slice_size = 0;
        assert!(s.validate().is_err());

        assert!(DetectionSettings::default().validate().is_ok());
    }
}
