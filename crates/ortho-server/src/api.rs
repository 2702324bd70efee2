use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ortho_geo::{check_extension, convert, ConvertOptions};
use ortho_proto::{
    DetectRequest, DetectResponse, DetectionSettings, ExportItem, HealthResponse, ImageListing,
    SettingsUpdate, UpdateSettingsRequest, UploadResponse, UploadedFile,
};
use ortho_vision::{OnnxDetector, Renderer, VisionConfig, VisionError};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::pipeline::run_batch;
use crate::store::FileStore;

pub struct AppState {
    pub detector: Arc<Mutex<OnnxDetector>>,
    pub settings: RwLock<DetectionSettings>,
    pub store: FileStore,
    pub renderer: Renderer,
    pub vision_cfg: VisionConfig,
    pub detect_timeout: Duration,
    pub model_loaded: AtomicBool,
    pub gpu_available: AtomicBool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/detect", post(detect_images))
        .route("/upload-images", post(upload_images))
        .route("/export/images-detect", post(export_images))
        .route("/annotated-images", get(list_annotated))
        .route("/annotated-images/{name}", get(get_annotated))
        .route("/convert/tiff-to-png", post(convert_tiff))
        .route("/detect/settings", post(update_settings))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(512 * 1024 * 1024))
        .with_state(state)
}

async fn detect_images(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    if req.image_paths.is_empty() {
        return Err(ApiError::BadRequest("image_paths must not be empty".into()));
    }
    info!("detect: batch of {} image(s)", req.image_paths.len());
    let results =
        run_batch(state.detector.clone(), &req.image_paths, state.detect_timeout).await;
    Ok(Json(DetectResponse { results }))
}

async fn upload_images(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut results = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
    {
        let original = match field.file_name() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                errors.push("field without a filename".to_string());
                continue;
            }
        };
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                errors.push(format!("{}: read failed: {}", original, e));
                continue;
            }
        };
        match state.store.save_upload(&original, &bytes).await {
            Ok(path) => results.push(UploadedFile {
                original_filename: original,
                uploaded_path: path.display().to_string(),
            }),
            Err(e) => errors.push(format!("{}: {:#}", original, e)),
        }
    }

    if results.is_empty() && errors.is_empty() {
        return Err(ApiError::BadRequest("no files in request".into()));
    }
    info!("upload: stored {} file(s), {} error(s)", results.len(), errors.len());
    Ok(Json(UploadResponse {
        results,
        errors: (!errors.is_empty()).then_some(errors),
    }))
}

async fn export_images(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<ExportItem>>,
) -> Result<impl IntoResponse, ApiError> {
    if items.is_empty() {
        return Err(ApiError::BadRequest("export list must not be empty".into()));
    }

    let mut targets = Vec::with_capacity(items.len());
    for item in items {
        let source = std::path::PathBuf::from(&item.image_path);
        let target = state.store.annotated_target(&item.image_path);
        let detections: Vec<_> =
            item.detections.iter().map(crate::format::detection_from_record).collect();

        let renderer = state.renderer.clone();
        let out = target.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            renderer.render(&source, &detections, &out)
        })
        .await
        .context("render task")?;

        match rendered {
            Ok(()) => targets.push(target),
            Err(e) => warn!("export: render failed for {}: {}", item.image_path, e),
        }
    }

    let (bytes, added) =
        tokio::task::spawn_blocking(move || crate::export::build_zip(&targets))
            .await
            .context("zip task")??;
    if added == 0 {
        return Err(ApiError::NotFound("no exportable files".into()));
    }
    info!("export: packaged {} file(s)", added);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"images.zip\""),
    );
    if let Ok(v) = HeaderValue::from_str(&added.to_string()) {
        headers.insert("X-Files-Added", v);
    }
    Ok((headers, bytes))
}

async fn list_annotated(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ImageListing>, ApiError> {
    let images = state.store.list_annotated().await?;
    Ok(Json(ImageListing { images }))
}

async fn get_annotated(
    State(state): State<Arc<AppState>>,
    UrlPath(name): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .store
        .annotated_lookup(&name)
        .ok_or_else(|| ApiError::NotFound(format!("no such image: {}", name)))?;
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("read {}", path.display()))?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some(e) if e.eq_ignore_ascii_case("png") => "image/png",
        Some(e) if e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

#[derive(Debug, Deserialize)]
struct ConvertQuery {
    save_georeference: Option<bool>,
}

async fn convert_tiff(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConvertQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
        .ok_or_else(|| ApiError::BadRequest("no file in request".into()))?;
    let original = field
        .file_name()
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("field without a filename".into()))?;
    check_extension(&original)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("read upload: {}", e)))?;

    let stored = state.store.save_upload(&original, &bytes).await?;

    let settings = state.settings.read().await.clone();
    let opts = ConvertOptions {
        save_georeference: query.save_georeference.unwrap_or(settings.georeference),
        fallback_pixel_size: Some(settings.pixel_size),
    };
    let tiff = bytes.to_vec();
    let converted = tokio::task::spawn_blocking(move || convert(&tiff, &opts))
        .await
        .context("convert task")?
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("conversion failed: {}", e)))?;

    // PNG and any sidecars land next to the stored upload, sharing its stem.
    let png_path = stored.with_extension("png");
    tokio::fs::write(&png_path, &converted.png)
        .await
        .with_context(|| format!("write {}", png_path.display()))?;
    if let Some(world) = &converted.world_file {
        let pgw = stored.with_extension("pgw");
        tokio::fs::write(&pgw, world)
            .await
            .with_context(|| format!("write {}", pgw.display()))?;
    }
    if let Some(prj) = &converted.projection {
        let prj_path = stored.with_extension("prj");
        tokio::fs::write(&prj_path, prj)
            .await
            .with_context(|| format!("write {}", prj_path.display()))?;
    }
    info!(
        "convert: {} -> {} ({} sidecar file(s))",
        original,
        png_path.display(),
        converted.world_file.is_some() as u8 + converted.projection.is_some() as u8
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    if let Ok(v) = HeaderValue::from_str(&stored.display().to_string()) {
        headers.insert("Filepath", v);
    }
    Ok((headers, converted.png))
}

/// Merge, validate, reload, and commit — all under the model mutex.
///
/// The detector guard is taken before the current settings are read, so
/// concurrent updates serialize and each one merges onto the previously
/// committed result instead of a stale snapshot. The settings store is
/// written while the guard is still held, so no request can observe the
/// new model paired with the old settings. A failed reload keeps both the
/// old model and the old settings.
async fn apply_settings<D, F>(
    detector: Arc<Mutex<D>>,
    settings: &RwLock<DetectionSettings>,
    update: &SettingsUpdate,
    reload: F,
) -> Result<DetectionSettings, ApiError>
where
    D: Send + 'static,
    F: FnOnce(DetectionSettings) -> Result<D, VisionError> + Send + 'static,
{
    let mut guard = detector.lock_owned().await;
    let next = settings.read().await.apply(update);
    next.validate().map_err(ApiError::BadRequest)?;

    let load = next.clone();
    let reloaded = tokio::task::spawn_blocking(move || reload(load))
        .await
        .context("reload task")?;
    match reloaded {
        Ok(model) => {
            *guard = model;
            *settings.write().await = next.clone();
            drop(guard);
            Ok(next)
        }
        Err(e) => {
            warn!("settings: reload failed, keeping previous model: {}", e);
            Err(ApiError::Internal(anyhow::anyhow!("model reload failed: {}", e)))
        }
    }
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<DetectionSettings>, ApiError> {
    let cfg = state.vision_cfg.clone();
    let next = apply_settings(state.detector.clone(), &state.settings, &req.settings, move |s| {
        OnnxDetector::load(
            &cfg,
            &s.model_variant,
            s.confidence_threshold,
            s.slice_size,
            s.overlap_ratio,
        )
    })
    .await?;

    let gpu = state.detector.lock().await.uses_gpu();
    state.gpu_available.store(gpu, Ordering::Relaxed);
    state.model_loaded.store(true, Ordering::Relaxed);
    info!("settings: applied, model variant {}", next.model_variant);
    Ok(Json(next))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        gpu_available: state.gpu_available.load(Ordering::Relaxed),
        model_loaded: state.model_loaded.load(Ordering::Relaxed),
    })
}

/// Font path from config, if any.
pub fn font_path(cfg: &VisionConfig) -> Option<&Path> {
    cfg.font_path.as_deref().map(Path::new)
}
