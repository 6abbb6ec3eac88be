use crate::engine::Engine;
use fragmentor_identity::GeminiClient;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.fragmentor.Fragmentor1";
pub const OBJECT_PATH: &str = "/org/fragmentor/Fragmentor1";

/// D-Bus interface for the Fragmentor session daemon.
///
/// Bus name: org.fragmentor.Fragmentor1 (session bus)
/// Object path: /org/fragmentor/Fragmentor1
pub struct FragmentorService {
    pub engine: Engine<GeminiClient>,
    /// Used by `SaveOverlay` when the caller passes an empty path.
    pub overlay_path: PathBuf,
}

#[interface(name = "org.fragmentor.Fragmentor1")]
impl FragmentorService {
    /// Start the capture countdown. False if a face is missing or a cycle is running.
    async fn trigger(&self) -> bool {
        tracing::info!("trigger requested");
        self.engine.trigger().await
    }

    /// Clear the displayed identity. False unless one is displayed.
    async fn reset(&self) -> bool {
        tracing::info!("reset requested");
        self.engine.reset().await
    }

    /// Clear the transient error message.
    async fn dismiss_error(&self) {
        self.engine.dismiss_error().await;
    }

    /// Session state as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.engine.status().await)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Placed identity tags as a JSON array; empty unless displaying.
    async fn tags(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.engine.tags().await)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Write the mirrored frame plus overlay as PNG.
    async fn save_overlay(&self, path: &str) -> zbus::fdo::Result<bool> {
        let path = if path.is_empty() {
            self.overlay_path.clone()
        } else {
            PathBuf::from(path)
        };
        tracing::info!(path = %path.display(), "save_overlay requested");
        match self.engine.save_overlay(&path).await {
            Ok(()) => Ok(true),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }
}
