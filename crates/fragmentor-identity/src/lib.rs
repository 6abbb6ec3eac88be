//! fragmentor-identity — Fabricated social-media identities from face attributes.
//!
//! [`GeminiClient`] asks Gemini for one "accurate" bio plus a cloud of
//! deliberately wrong ones. Generation never fails from the caller's point of
//! view: every error is reported alongside the [`fallback_identity`].

pub mod gemini;
pub mod prompt;

pub use gemini::{GeminiClient, GeminiConfig, GenerationError};

use fragmentor_core::types::{AiResponse, GenerationOutcome, IdentityInput, PrimaryIdentity};
use std::future::Future;

/// Anything that can turn a locked snapshot into identities.
pub trait IdentityGenerator {
    /// Always resolves; on failure the outcome carries the fallback identity.
    fn generate(&self, input: &IdentityInput) -> impl Future<Output = GenerationOutcome> + Send;
}

/// The fixed identity shown when generation fails.
pub fn fallback_identity() -> AiResponse {
    AiResponse {
        primary_identity: PrimaryIdentity {
            bio: "Error 404: Identity Not Found 🤖".to_string(),
            tags: vec![
                "#error".to_string(),
                "#glitch".to_string(),
                "#system_fail".to_string(),
            ],
            match_score: 0.0,
        },
        alternatives: Vec::new(),
    }
}
