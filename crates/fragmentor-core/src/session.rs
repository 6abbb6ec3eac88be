//! Capture/generation workflow as a single state store.
//!
//! Every transition is a plain method on [`Session`]; anything asynchronous
//! (the countdown timer, the generation call) is handed back to the caller as
//! an [`Effect`]. Results of effects come back in through
//! [`Session::countdown_tick`] and [`Session::complete_generation`].

use crate::types::{AiResponse, Detection, GenerationOutcome, IdentityInput, Snapshot};
use serde::Serialize;

/// Countdown start value, one step per second.
pub const COUNTDOWN_START: u32 = 3;

/// Message shown when the face is gone by the time the countdown ends.
pub const SUBJECT_LOST: &str = "SUBJECT_LOST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    LoadingModels,
    WaitingForFace,
    Countdown,
    Generating,
    Displaying,
    /// Terminal: model load or camera failure.
    Fatal,
}

/// Unrecoverable startup failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalError {
    ModelLoad(String),
    DeviceAccess(String),
}

impl FatalError {
    pub fn message(&self) -> &'static str {
        match self {
            FatalError::ModelLoad(_) => "SYS_ERR: MODEL_LOAD_FAIL",
            FatalError::DeviceAccess(_) => "ACCESS DENIED: OPTIC SENSORS OFFLINE",
        }
    }
}

/// A generation call to run, tagged with the cycle it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: u64,
    pub input: IdentityInput,
}

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Call [`Session::countdown_tick`] once per second until it stops asking.
    StartCountdown,
    Generate(GenerationRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    NoFace,
    WrongState(SessionState),
    StaleGeneration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Option<Effect>),
    Ignored(Ignored),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn effect(self) -> Option<Effect> {
        match self {
            Transition::Applied(effect) => effect,
            Transition::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    live: Option<Detection>,
    live_expression: String,
    snapshot: Option<Snapshot>,
    response: Option<AiResponse>,
    countdown: u32,
    generation: u64,
    error: Option<String>,
    fatal: Option<FatalError>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::LoadingModels,
            live: None,
            live_expression: "scanning...".to_string(),
            snapshot: None,
            response: None,
            countdown: COUNTDOWN_START,
            generation: 0,
            error: None,
            fatal: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn live(&self) -> Option<&Detection> {
        self.live.as_ref()
    }

    /// Dominant expression of the most recent live detection.
    pub fn live_expression(&self) -> &str {
        &self.live_expression
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn response(&self) -> Option<&AiResponse> {
        self.response.as_ref()
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn fatal(&self) -> Option<&FatalError> {
        self.fatal.as_ref()
    }

    /// Whether the trigger control should be enabled.
    pub fn can_trigger(&self) -> bool {
        self.state == SessionState::WaitingForFace && self.live.is_some()
    }

    /// Whether the reset control should be enabled.
    pub fn can_reset(&self) -> bool {
        self.state == SessionState::Displaying
    }

    /// Models loaded and camera started.
    pub fn models_ready(&mut self) -> Transition {
        if self.state != SessionState::LoadingModels {
            return Transition::Ignored(Ignored::WrongState(self.state));
        }
        self.enter(SessionState::WaitingForFace);
        Transition::Applied(None)
    }

    /// Enter the terminal state. Later transitions are all ignored.
    pub fn fail(&mut self, error: FatalError) -> Transition {
        if self.state == SessionState::Fatal {
            return Transition::Ignored(Ignored::WrongState(self.state));
        }
        tracing::error!(?error, "session failed");
        self.error = Some(error.message().to_string());
        self.fatal = Some(error);
        self.enter(SessionState::Fatal);
        Transition::Applied(None)
    }

    /// Publish the latest poll result. Never changes state.
    pub fn observe(&mut self, detection: Option<Detection>) {
        if let Some(d) = &detection {
            self.live_expression = d.dominant_expression().to_string();
        }
        self.live = detection;
    }

    /// User trigger: start the countdown if a face is present.
    pub fn trigger(&mut self) -> Transition {
        if self.state != SessionState::WaitingForFace {
            return Transition::Ignored(Ignored::WrongState(self.state));
        }
        if self.live.is_none() {
            return Transition::Ignored(Ignored::NoFace);
        }
        self.countdown = COUNTDOWN_START;
        self.error = None;
        self.enter(SessionState::Countdown);
        Transition::Applied(Some(Effect::StartCountdown))
    }

    /// One countdown second elapsed.
    ///
    /// On reaching zero, snapshots the live detection and requests generation.
    /// If the face is gone at that moment the cycle is abandoned with
    /// [`SUBJECT_LOST`] rather than generating from empty data.
    pub fn countdown_tick(&mut self) -> Transition {
        if self.state != SessionState::Countdown {
            return Transition::Ignored(Ignored::WrongState(self.state));
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return Transition::Applied(None);
        }

        let Some(live) = &self.live else {
            tracing::warn!("face lost during countdown; aborting cycle");
            self.error = Some(SUBJECT_LOST.to_string());
            self.enter(SessionState::WaitingForFace);
            return Transition::Applied(None);
        };

        let snapshot = Snapshot::capture(live);
        let input = IdentityInput::from(&snapshot);
        self.snapshot = Some(snapshot);
        self.generation += 1;
        self.enter(SessionState::Generating);

        Transition::Applied(Some(Effect::Generate(GenerationRequest {
            id: self.generation,
            input,
        })))
    }

    /// Deliver the result of generation cycle `id`.
    ///
    /// Results for any cycle other than the one currently generating are
    /// dropped, so a late response after a reset cannot bring back Displaying.
    pub fn complete_generation(&mut self, id: u64, outcome: GenerationOutcome) -> Transition {
        if self.state != SessionState::Generating || id != self.generation {
            tracing::debug!(id, current = self.generation, state = ?self.state, "dropping stale generation result");
            return Transition::Ignored(Ignored::StaleGeneration);
        }

        match outcome.failure {
            None => {
                self.response = Some(outcome.response);
                self.enter(SessionState::Displaying);
            }
            Some(reason) => {
                tracing::warn!(%reason, "generation failed");
                self.snapshot = None;
                self.response = None;
                self.error = Some("GENERATION_ABORTED".to_string());
                self.enter(SessionState::WaitingForFace);
            }
        }
        Transition::Applied(None)
    }

    /// User reset: drop the response and snapshot.
    pub fn reset(&mut self) -> Transition {
        if self.state != SessionState::Displaying {
            return Transition::Ignored(Ignored::WrongState(self.state));
        }
        self.response = None;
        self.snapshot = None;
        self.enter(SessionState::WaitingForFace);
        Transition::Applied(None)
    }

    pub fn dismiss_error(&mut self) {
        if self.state != SessionState::Fatal {
            self.error = None;
        }
    }

    fn enter(&mut self, next: SessionState) {
        tracing::info!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::detection;
    use crate::types::PrimaryIdentity;

    fn response(bio: &str, alternatives: usize) -> AiResponse {
        AiResponse {
            primary_identity: PrimaryIdentity {
                bio: bio.to_string(),
                tags: vec!["#fyp".to_string()],
                match_score: 92.0,
            },
            alternatives: (0..alternatives)
                .map(|i| crate::types::IdentityFragment {
                    text: format!("alt {i}"),
                    gender: "male".to_string(),
                    age: "30s".to_string(),
                    bias_type: "Age bias".to_string(),
                })
                .collect(),
        }
    }

    fn waiting_with_face() -> Session {
        let mut s = Session::new();
        assert!(s.models_ready().is_applied());
        s.observe(Some(detection(100.0, 100.0, 200.0, 200.0, 24.0)));
        s
    }

    /// Drive a session to Generating and return the request.
    fn to_generating(s: &mut Session) -> GenerationRequest {
        assert_eq!(s.trigger().effect(), Some(Effect::StartCountdown));
        assert_eq!(s.countdown_tick(), Transition::Applied(None));
        assert_eq!(s.countdown_tick(), Transition::Applied(None));
        match s.countdown_tick().effect() {
            Some(Effect::Generate(req)) => req,
            other => panic!("expected generate effect, got {other:?}"),
        }
    }

    #[test]
    fn test_starts_loading() {
        let s = Session::new();
        assert_eq!(s.state(), SessionState::LoadingModels);
        assert!(!s.can_trigger());
    }

    #[test]
    fn test_trigger_without_face_is_noop() {
        let mut s = Session::new();
        s.models_ready();
        assert_eq!(s.trigger(), Transition::Ignored(Ignored::NoFace));
        assert_eq!(s.state(), SessionState::WaitingForFace);
    }

    #[test]
    fn test_trigger_while_loading_is_noop() {
        let mut s = Session::new();
        s.observe(Some(detection(0.0, 0.0, 10.0, 10.0, 20.0)));
        assert!(!s.trigger().is_applied());
        assert_eq!(s.state(), SessionState::LoadingModels);
    }

    #[test]
    fn test_countdown_counts_three_seconds() {
        let mut s = waiting_with_face();
        s.trigger();
        assert_eq!(s.state(), SessionState::Countdown);
        assert_eq!(s.countdown(), 3);
        s.countdown_tick();
        assert_eq!(s.countdown(), 2);
        s.countdown_tick();
        assert_eq!(s.countdown(), 1);
        assert_eq!(s.state(), SessionState::Countdown);
        s.countdown_tick();
        assert_eq!(s.countdown(), 0);
        assert_eq!(s.state(), SessionState::Generating);
    }

    #[test]
    fn test_retrigger_ignored_in_busy_states() {
        let mut s = waiting_with_face();
        s.trigger();
        assert_eq!(s.trigger(), Transition::Ignored(Ignored::WrongState(SessionState::Countdown)));

        let mut s = waiting_with_face();
        let req = to_generating(&mut s);
        assert!(!s.trigger().is_applied());
        s.complete_generation(req.id, GenerationOutcome::success(response("ok", 3)));
        assert_eq!(s.trigger(), Transition::Ignored(Ignored::WrongState(SessionState::Displaying)));
    }

    #[test]
    fn test_generation_request_uses_snapshot() {
        let mut s = waiting_with_face();
        let req = to_generating(&mut s);
        assert_eq!(req.id, 1);
        assert_eq!(req.input.age, 24.0);
        assert_eq!(s.snapshot().unwrap().expression, "happy");
    }

    #[test]
    fn test_snapshot_survives_live_updates() {
        let mut s = waiting_with_face();
        let req = to_generating(&mut s);
        s.complete_generation(req.id, GenerationOutcome::success(response("ok", 20)));
        assert_eq!(s.state(), SessionState::Displaying);

        s.observe(Some(detection(300.0, 50.0, 180.0, 180.0, 40.0)));
        assert_eq!(s.live().unwrap().age, 40.0);
        assert_eq!(s.snapshot().unwrap().detection.age, 24.0);
        assert_eq!(s.snapshot().unwrap().detection.bbox.x, 100.0);
    }

    #[test]
    fn test_generation_failure_rolls_back() {
        let mut s = waiting_with_face();
        let req = to_generating(&mut s);
        let fallback = response("Error 404: Identity Not Found 🤖", 0);
        s.complete_generation(req.id, GenerationOutcome::failed(fallback, "transport error"));

        assert_eq!(s.state(), SessionState::WaitingForFace);
        assert!(s.snapshot().is_none());
        assert!(s.response().is_none());
        assert_eq!(s.error(), Some("GENERATION_ABORTED"));

        s.dismiss_error();
        assert_eq!(s.error(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        for alternatives in [0, 1, 20] {
            let mut s = waiting_with_face();
            let req = to_generating(&mut s);
            s.complete_generation(req.id, GenerationOutcome::success(response("x", alternatives)));
            assert!(s.can_reset());
            assert!(s.reset().is_applied());
            assert_eq!(s.state(), SessionState::WaitingForFace);
            assert!(s.snapshot().is_none());
            assert!(s.response().is_none());
        }
    }

    #[test]
    fn test_reset_outside_displaying_is_noop() {
        let mut s = waiting_with_face();
        assert!(!s.reset().is_applied());
        assert_eq!(s.state(), SessionState::WaitingForFace);
    }

    #[test]
    fn test_late_result_after_reset_is_dropped() {
        let mut s = waiting_with_face();
        let first = to_generating(&mut s);
        s.complete_generation(first.id, GenerationOutcome::success(response("first", 1)));
        s.reset();

        // Duplicate delivery of the finished cycle.
        assert_eq!(
            s.complete_generation(first.id, GenerationOutcome::success(response("dup", 1))),
            Transition::Ignored(Ignored::StaleGeneration)
        );
        assert_eq!(s.state(), SessionState::WaitingForFace);

        // A new cycle must not accept the old id either.
        let second = to_generating(&mut s);
        assert_eq!(second.id, first.id + 1);
        assert!(!s
            .complete_generation(first.id, GenerationOutcome::success(response("stale", 1)))
            .is_applied());
        assert_eq!(s.state(), SessionState::Generating);
        assert!(s
            .complete_generation(second.id, GenerationOutcome::success(response("fresh", 1)))
            .is_applied());
        assert_eq!(s.response().unwrap().primary_identity.bio, "fresh");
    }

    #[test]
    fn test_face_lost_during_countdown_aborts_at_zero() {
        let mut s = waiting_with_face();
        s.trigger();
        s.observe(None);
        s.countdown_tick();
        s.countdown_tick();
        assert_eq!(s.state(), SessionState::Countdown);
        assert_eq!(s.countdown_tick(), Transition::Applied(None));
        assert_eq!(s.state(), SessionState::WaitingForFace);
        assert_eq!(s.error(), Some(SUBJECT_LOST));
        assert!(s.snapshot().is_none());
    }

    #[test]
    fn test_face_regained_before_zero_generates() {
        let mut s = waiting_with_face();
        s.trigger();
        s.observe(None);
        s.countdown_tick();
        s.observe(Some(detection(10.0, 10.0, 90.0, 90.0, 33.0)));
        s.countdown_tick();
        assert!(matches!(s.countdown_tick().effect(), Some(Effect::Generate(_))));
        assert_eq!(s.snapshot().unwrap().detection.age, 33.0);
    }

    #[test]
    fn test_fatal_is_terminal() {
        let mut s = Session::new();
        s.fail(FatalError::ModelLoad("det_10g.onnx missing".into()));
        assert_eq!(s.state(), SessionState::Fatal);
        assert_eq!(s.error(), Some("SYS_ERR: MODEL_LOAD_FAIL"));

        s.observe(Some(detection(0.0, 0.0, 10.0, 10.0, 20.0)));
        assert!(!s.models_ready().is_applied());
        assert!(!s.trigger().is_applied());
        assert!(!s.fail(FatalError::DeviceAccess("again".into())).is_applied());
        s.dismiss_error();
        assert_eq!(s.error(), Some("SYS_ERR: MODEL_LOAD_FAIL"));
        assert_eq!(s.state(), SessionState::Fatal);
    }

    #[test]
    fn test_live_expression_tracks_detection() {
        let mut s = waiting_with_face();
        assert_eq!(s.live_expression(), "happy");
        s.observe(None);
        assert_eq!(s.live_expression(), "happy");
    }
}
