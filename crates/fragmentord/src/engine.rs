//! Session controller: owns the state store, runs the effects it asks for
//! (countdown timer, generation call), and keeps the overlay current.

use crate::capture::Observation;
use fragmentor_core::layout::{layout_tags, PlacedTag};
use fragmentor_core::overlay::{compose_mirrored, render, Canvas, CanvasError, RasterCanvas};
use fragmentor_core::session::{Effect, GenerationRequest, Transition};
use fragmentor_core::{FatalError, Session, SessionState};
use fragmentor_identity::IdentityGenerator;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no camera frame available yet")]
    NoFrame,
    #[error("overlay error: {0}")]
    Overlay(#[from] CanvasError),
}

/// Snapshot of controller state for `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub state: SessionState,
    pub countdown: u32,
    pub face_detected: bool,
    pub expression: String,
    pub error: Option<String>,
    pub fatal: Option<FatalError>,
    pub can_trigger: bool,
    pub can_reset: bool,
    pub frame_width: u32,
    pub frame_height: u32,
}

struct Shared<G> {
    session: Mutex<Session>,
    overlay: Mutex<OverlayState>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    generator: G,
    countdown_step: Duration,
}

struct OverlayState {
    canvas: RasterCanvas,
    latest: Observation,
    started: Instant,
}

/// Clone-safe handle to the controller.
pub struct Engine<G> {
    shared: Arc<Shared<G>>,
}

impl<G> Clone for Engine<G> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<G> Engine<G>
where
    G: IdentityGenerator + Send + Sync + 'static,
{
    pub fn new(generator: G, canvas: RasterCanvas, countdown_step: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::new()),
                overlay: Mutex::new(OverlayState {
                    canvas,
                    latest: Observation::default(),
                    started: Instant::now(),
                }),
                countdown: Mutex::new(None),
                generator,
                countdown_step,
            }),
        }
    }

    pub async fn models_ready(&self) {
        self.shared.session.lock().await.models_ready();
    }

    pub async fn fail(&self, error: FatalError) {
        self.shared.session.lock().await.fail(error);
    }

    /// Feed one poll result: update the session and redraw the overlay.
    pub async fn observe(&self, obs: Observation) {
        let (snapshot, expression) = {
            let mut session = self.shared.session.lock().await;
            session.observe(obs.detection.clone());
            (session.snapshot().cloned(), session.live_expression().to_string())
        };

        let mut overlay = self.shared.overlay.lock().await;
        let elapsed = overlay.started.elapsed().as_secs_f64();
        let frame_size = match (obs.frame_size(), overlay.latest.frame_size()) {
            ((0, 0), (0, 0)) => (overlay.canvas.width(), overlay.canvas.height()),
            ((0, 0), last) => last,
            (size, _) => size,
        };
        render(
            &mut overlay.canvas,
            frame_size,
            obs.detection.as_ref(),
            snapshot.as_ref(),
            &expression,
            elapsed,
        );
        // Keep the last good frame for export when a capture fails.
        if obs.frame.is_some() {
            overlay.latest = obs;
        } else {
            overlay.latest.detection = obs.detection;
            overlay.latest.sequence = obs.sequence;
        }
    }

    /// Consume poll results until the channel closes.
    pub async fn run(&self, mut observations: watch::Receiver<Observation>) {
        while observations.changed().await.is_ok() {
            let obs = observations.borrow_and_update().clone();
            self.observe(obs).await;
        }
        tracing::info!("observation channel closed");
    }

    /// User trigger. Returns whether a countdown started.
    pub async fn trigger(&self) -> bool {
        let transition = self.shared.session.lock().await.trigger();
        match transition {
            Transition::Applied(Some(Effect::StartCountdown)) => {
                self.start_countdown().await;
                true
            }
            Transition::Applied(_) => true,
            Transition::Ignored(reason) => {
                tracing::debug!(?reason, "trigger ignored");
                false
            }
        }
    }

    /// User reset. Returns whether the displayed identity was cleared.
    pub async fn reset(&self) -> bool {
        self.shared.session.lock().await.reset().is_applied()
    }

    pub async fn dismiss_error(&self) {
        self.shared.session.lock().await.dismiss_error();
    }

    pub async fn status(&self) -> Status {
        let (frame_width, frame_height) = self.shared.overlay.lock().await.latest.frame_size();
        let session = self.shared.session.lock().await;
        Status {
            version: env!("CARGO_PKG_VERSION"),
            state: session.state(),
            countdown: session.countdown(),
            face_detected: session.live().is_some(),
            expression: session.live_expression().to_string(),
            error: session.error().map(str::to_string),
            fatal: session.fatal().cloned(),
            can_trigger: session.can_trigger(),
            can_reset: session.can_reset(),
            frame_width,
            frame_height,
        }
    }

    /// Tags for the current display, empty unless an identity is shown.
    pub async fn tags(&self) -> Vec<PlacedTag> {
        let frame_size = self.shared.overlay.lock().await.latest.frame_size();
        let session = self.shared.session.lock().await;
        layout_tags(&session, frame_size)
    }

    /// Write the mirrored frame with the overlay on top as a PNG.
    pub async fn save_overlay(&self, path: &Path) -> Result<(), EngineError> {
        let overlay = self.shared.overlay.lock().await;
        let frame = overlay.latest.frame.clone().ok_or(EngineError::NoFrame)?;
        let image = compose_mirrored(&frame.data, frame.width, frame.height, overlay.canvas.image())?;
        image.save(path).map_err(CanvasError::from)?;
        tracing::info!(path = %path.display(), "overlay saved");
        Ok(())
    }

    /// Abort a running countdown. In-flight generations are left to finish;
    /// their result is dropped if the session moved on.
    pub async fn shutdown(&self) {
        if let Some(task) = self.shared.countdown.lock().await.take() {
            task.abort();
        }
    }

    async fn start_countdown(&self) {
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run_countdown().await });
        if let Some(previous) = self.shared.countdown.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn run_countdown(&self) {
        let mut ticker = tokio::time::interval(self.shared.countdown_step);
        // The first tick of an interval fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut session = self.shared.session.lock().await;
            match session.countdown_tick() {
                Transition::Applied(Some(Effect::Generate(request))) => {
                    drop(session);
                    self.spawn_generation(request);
                    return;
                }
                Transition::Applied(_) if session.state() == SessionState::Countdown => {
                    tracing::debug!(remaining = session.countdown(), "countdown");
                }
                _ => return,
            }
        }
    }

    fn spawn_generation(&self, request: GenerationRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            let GenerationRequest { id, input } = request;
            tracing::info!(id, "generation started");
            let outcome = engine.shared.generator.generate(&input).await;
            let applied = engine
                .shared
                .session
                .lock()
                .await
                .complete_generation(id, outcome)
                .is_applied();
            if !applied {
                tracing::info!(id, "generation result discarded");
            }
        });
    }

    #[cfg(test)]
    async fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut *self.shared.session.lock().await)
    }
}
