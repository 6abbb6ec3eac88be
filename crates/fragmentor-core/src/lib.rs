//! fragmentor-core — Face analysis, session state and HUD rendering.
//!
//! Runs SCRFD detection plus landmark, expression and age/gender models via
//! ONNX Runtime, drives the capture/generate/display state machine, and draws
//! the mirrored overlay and identity tag layout.

pub mod analyzer;
pub mod attributes;
pub mod crop;
pub mod detector;
pub mod landmarks;
pub mod layout;
pub mod overlay;
pub mod session;
pub mod types;

pub use analyzer::{Analyzer, AnalyzerError, DetectorAdapter, ModelLoadError, ModelPaths, OnnxFaceAnalyzer};
pub use session::{Effect, FatalError, GenerationRequest, Session, SessionState, Transition};
pub use types::{
    AiResponse, BoundingBox, Detection, Gender, GenerationOutcome, IdentityFragment, IdentityInput,
    PrimaryIdentity, Snapshot,
};
