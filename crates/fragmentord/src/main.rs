use anyhow::{Context, Result};
use fragmentor_core::overlay::RasterCanvas;
use fragmentor_core::{DetectorAdapter, FatalError, ModelPaths, OnnxFaceAnalyzer};
use fragmentor_hw::Camera;
use fragmentor_identity::GeminiClient;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod dbus_interface;
mod engine;

use capture::CaptureSession;
use config::Config;
use dbus_interface::{FragmentorService, BUS_NAME, OBJECT_PATH};
use engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("fragmentord starting");

    let config = Config::load()?;
    if config.gemini.api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY not set; every generation will use the fallback identity");
    }

    let mut canvas = RasterCanvas::new(config.camera_width, config.camera_height);
    match &config.font_path {
        Some(path) => match RasterCanvas::load_font(path) {
            Ok(font) => canvas = canvas.with_font(font),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "overlay font unavailable; HUD text disabled"),
        },
        None => tracing::info!("no overlay font configured; HUD text disabled"),
    }

    let generator = GeminiClient::new(config.gemini_config())?;
    let engine = Engine::new(generator, canvas, config.countdown_step());

    // Serve D-Bus first so clients can watch startup and see fatal errors.
    let service = FragmentorService {
        engine: engine.clone(),
        overlay_path: config.overlay_path.clone(),
    };
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let paths = ModelPaths::in_dir(&config.model_dir);
    let analyzer = match tokio::task::spawn_blocking(move || OnnxFaceAnalyzer::load(&paths)).await? {
        Ok(analyzer) => Some(analyzer),
        Err(e) => {
            tracing::error!(error = %e, "model load failed");
            engine.fail(FatalError::ModelLoad(e.to_string())).await;
            None
        }
    };

    let camera = match analyzer {
        Some(_) => {
            let (device, w, h) = (config.camera_device.clone(), config.camera_width, config.camera_height);
            match tokio::task::spawn_blocking(move || Camera::open(&device, w, h)).await? {
                Ok(camera) => Some(camera),
                Err(e) => {
                    tracing::error!(error = %e, "camera open failed");
                    engine.fail(FatalError::DeviceAccess(e.to_string())).await;
                    None
                }
            }
        }
        None => None,
    };

    let mut capture = None;
    if let (Some(analyzer), Some(camera)) = (analyzer, camera) {
        let (handle, observations) =
            CaptureSession::start(camera, DetectorAdapter::new(analyzer), config.poll_interval())
                .context("failed to spawn capture thread")?;
        engine.models_ready().await;
        let runner = engine.clone();
        tokio::spawn(async move { runner.run(observations).await });
        capture = Some(handle);
        tracing::info!("fragmentord ready");
    }

    // Keep serving status in the fatal state until signaled.
    tokio::signal::ctrl_c().await?;
    tracing::info!("fragmentord shutting down");

    engine.shutdown().await;
    if let Some(mut handle) = capture {
        tokio::task::spawn_blocking(move || handle.stop()).await?;
    }

    Ok(())
}
