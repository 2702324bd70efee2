mod api;
mod config;
mod error;
mod export;
mod format;
mod pipeline;
mod store;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ortho_vision::{OnnxDetector, Renderer};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use store::FileStore;

#[derive(Parser)]
#[command(name = "orthoscan", about = "Aerial imagery detection service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "orthoscan.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and environment, then exit.
    Doctor,
    /// Start the HTTP service.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.command {
        Command::Doctor => doctor(&cfg),
        Command::Run => run(cfg).await,
    }
}

fn doctor(cfg: &config::ServerConfig) -> Result<()> {
    cfg.http
        .bind
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("bad bind address: {}", cfg.http.bind))?;

    cfg.detect
        .defaults
        .validate()
        .map_err(|e| anyhow::anyhow!("detect defaults: {}", e))?;

    let variant = &cfg.detect.defaults.model_variant;
    let weights = cfg
        .vision
        .models
        .get(variant)
        .with_context(|| format!("default model variant '{}' not in [vision.models]", variant))?;
    if !Path::new(weights).exists() {
        bail!("weights for '{}' not found: {}", variant, weights);
    }

    if cfg.vision.class_names.len() != cfg.vision.num_classes {
        bail!(
            "class_names has {} entries, num_classes is {}",
            cfg.vision.class_names.len(),
            cfg.vision.num_classes
        );
    }

    std::fs::create_dir_all(&cfg.storage.data_dir)
        .with_context(|| format!("data dir not usable: {}", cfg.storage.data_dir))?;

    match &cfg.vision.font_path {
        Some(p) if !Path::new(p).exists() => {
            warn!("doctor: font not found at {}; labels will be omitted", p)
        }
        Some(_) => {}
        None => warn!("doctor: no font_path configured; labels will be omitted"),
    }

    info!("doctor: configuration ok");
    Ok(())
}

async fn run(cfg: config::ServerConfig) -> Result<()> {
    let store = FileStore::open(Path::new(&cfg.storage.data_dir))?;
    let renderer = Renderer::new(api::font_path(&cfg.vision));

    let vision_cfg = cfg.vision.clone();
    let defaults = cfg.detect.defaults.clone();
    let detector = tokio::task::spawn_blocking(move || {
        OnnxDetector::load(
            &vision_cfg,
            &defaults.model_variant,
            defaults.confidence_threshold,
            defaults.slice_size,
            defaults.overlap_ratio,
        )
    })
    .await
    .context("model load task")?
    .map_err(|e| anyhow::anyhow!("load model: {}", e))?;
    let gpu = detector.uses_gpu();

    let state = Arc::new(AppState {
        detector: Arc::new(Mutex::new(detector)),
        settings: RwLock::new(cfg.detect.defaults.clone()),
        store,
        renderer,
        vision_cfg: cfg.vision.clone(),
        detect_timeout: Duration::from_secs(cfg.detect.timeout_secs),
        model_loaded: AtomicBool::new(true),
        gpu_available: AtomicBool::new(gpu),
    });

    let cors = if cfg.http.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cfg
            .http
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = api::router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("bind {}", cfg.http.bind))?;
    info!("listening on {}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
