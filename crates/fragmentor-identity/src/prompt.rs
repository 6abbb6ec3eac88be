//! Prompt text and structured response schema sent to Gemini.

use fragmentor_core::types::IdentityInput;
use serde_json::{json, Value};

/// Number of wrong identities requested per generation.
pub const DEFAULT_ALTERNATIVES: usize = 20;

/// Build the generation prompt. Age is rounded; the expression is the
/// highest-scoring label (first wins on ties).
pub fn build_prompt(input: &IdentityInput, alternatives: usize) -> String {
    let expression = input.expressions.dominant().unwrap_or("neutral");
    format!(
        r#"You are an algorithmic mirror on social media.

INPUT DATA:
- Visual Gender: {gender}
- Visual Age: {age}
- Expression: {expression}

TASK:
1. Primary Identity: Generate an "Instagram Bio" that perfectly matches the visual data. Use emojis. It should feel like a standard, slightly basic influencer profile or a normal user.
2. Alternatives: Generate {alternatives} DIFFERENT Instagram bios that are WRONG or BIASED.
   - Imagine the algorithm makes mistakes: thinks a 20yo guy is a 50yo mom, or a 30yo woman is a 15yo gamer.
   - Include wild hallucinations (e.g., "Bot account", "Crypto scammer", "Cat lover", "Conspiracy Theorist", "NPC").
   - These represent the "Noise" and "Projected Identities" of the internet.

CONSTRAINTS:
- Age MUST be a number or number range (e.g., "25", "18", "40s"). DO NOT use words like "Teen" or "Adult".
- Use emojis 🧢 ✨ 💅 🚀
- Use hashtags #fyp #mood
- Short, punchy text."#,
        gender = input.gender,
        age = input.age.round() as i64,
    )
}

/// Gemini `responseSchema` matching [`fragmentor_core::types::AiResponse`].
pub fn response_schema(alternatives: usize) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "primaryIdentity": {
                "type": "OBJECT",
                "description": "The identity the algorithm thinks is most accurate.",
                "properties": {
                    "bio": { "type": "STRING", "description": "Instagram bio style: Short, 1-2 lines, emojis." },
                    "tags": {
                        "type": "ARRAY",
                        "items": { "type": "STRING" },
                        "description": "3-4 Hashtags #gender #age #vibe"
                    },
                    "matchScore": { "type": "NUMBER", "description": "Confidence score 80-99%" }
                },
                "required": ["bio", "tags", "matchScore"]
            },
            "alternatives": {
                "type": "ARRAY",
                "description": format!("{alternatives} alternative 'misinterpretations'."),
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "text": { "type": "STRING", "description": "Instagram bio text." },
                        "gender": { "type": "STRING" },
                        "age": { "type": "STRING", "description": "Numeric string (e.g. '25', '30s', '19')." },
                        "biasType": { "type": "STRING", "description": "Type of bias/error." }
                    },
                    "required": ["text", "gender", "age", "biasType"]
                }
            }
        },
        "required": ["primaryIdentity", "alternatives"]
    })
}
