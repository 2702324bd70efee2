use serde::{Deserialize, Serialize};

/// One detected object, in source-image pixel coordinates.
///
/// Immutable once produced; `verified` is assigned later by a reviewer and
/// round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "type")]
    pub category: String,
    /// x, y, width, height
    pub bbox: [u32; 4],
    pub confidence: f32,
    pub verified: Option<bool>,
}

/// Per-image failure categories. Whole-request problems (bad uploads,
/// empty bodies, conversion failures) surface as HTTP errors instead and
/// never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Model,
    Render,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-image batch entry: either detections or a tagged error, never both.
/// The response list preserves request order, so the Nth outcome belongs to
/// the Nth input path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutcome {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<DetectionRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl ImageOutcome {
    pub fn success(image_path: impl Into<String>, detections: Vec<DetectionRecord>) -> Self {
        Self { image_path: image_path.into(), detections: Some(detections), error: None }
    }

    pub fn failure(image_path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            detections: None,
            error: Some(OutcomeError { kind, message: message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub image_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub results: Vec<ImageOutcome>,
}

/// Body item for the annotate-and-export endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportItem {
    pub image_path: String,
    pub detections: Vec<DetectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub original_filename: String,
    pub uploaded_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub results: Vec<UploadedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    pub name: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListing {
    pub images: Vec<StoredImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gpu_available: bool,
    pub model_loaded: bool,
}
