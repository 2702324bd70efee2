use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ortho_proto::{ErrorKind, ImageOutcome};
use ortho_vision::{Detect, Detection, VisionError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::format::format_outcome;

pub fn error_kind(err: &VisionError) -> ErrorKind {
    match err {
        VisionError::NotFound(_) => ErrorKind::NotFound,
        VisionError::ModelLoad(_) | VisionError::Inference(_) | VisionError::Image(_) => {
            ErrorKind::Model
        }
        VisionError::Render(_) => ErrorKind::Render,
    }
}

enum Slot {
    Ready(ImageOutcome),
    Pending(String, tokio::task::JoinHandle<ImageOutcome>),
}

/// Run detection over a batch of image paths, one at a time.
///
/// The detector mutex is the serialization point: the owned guard moves
/// into the blocking task, so even when a per-image timeout fires the next
/// image cannot start until the stuck inference actually returns. Failures
/// are per-image; the batch itself never errors.
pub async fn run_batch<D: Detect + 'static>(
    detector: Arc<Mutex<D>>,
    image_paths: &[String],
    timeout: Duration,
) -> Vec<ImageOutcome> {
    let mut slots = Vec::with_capacity(image_paths.len());

    for path in image_paths {
        let guard = detector.clone().lock_owned().await;
        let detect_path = PathBuf::from(path);
        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            guard.detect(&detect_path)
        });

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                warn!("detect timed out after {:?}: {}", timeout, path);
                Slot::Ready(ImageOutcome::failure(
                    path,
                    ErrorKind::Timeout,
                    format!("Detection timed out after {}s", timeout.as_secs()),
                ))
            }
            Ok(Err(join_err)) => Slot::Ready(ImageOutcome::failure(
                path,
                ErrorKind::Model,
                format!("detection task failed: {}", join_err),
            )),
            Ok(Ok(Err(err))) => {
                warn!("detect failed for {}: {}", path, err);
                Slot::Ready(ImageOutcome::failure(path, error_kind(&err), err.to_string()))
            }
            Ok(Ok(Ok(detections))) => {
                debug!("detected {} objects in {}", detections.len(), path);
                Slot::Pending(path.clone(), spawn_format(path.clone(), detections))
            }
        };
        slots.push(outcome);
    }

    let mut results = Vec::with_capacity(slots.len());
    for slot in slots {
        results.push(match slot {
            Slot::Ready(outcome) => outcome,
            Slot::Pending(path, handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => ImageOutcome::failure(
                    path,
                    ErrorKind::Model,
                    format!("formatting task failed: {}", join_err),
                ),
            },
        });
    }
    results
}

fn spawn_format(path: String, detections: Vec<Detection>) -> tokio::task::JoinHandle<ImageOutcome> {
    tokio::task::spawn_blocking(move || format_outcome(&path, &detections))
}
