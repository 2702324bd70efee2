pub mod detect;
pub mod settings;

pub use detect::{
    DetectRequest, DetectResponse, DetectionRecord, ErrorKind, ExportItem, HealthResponse,
    ImageListing, ImageOutcome, OutcomeError, StoredImage, UploadResponse, UploadedFile,
};
pub use settings::{DetectionSettings, SettingsUpdate, UpdateSettingsRequest};
