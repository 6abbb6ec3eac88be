//! Screen placement of identity tags, in percent of the mirrored view.
//!
//! The primary tag follows the face. Alternatives form a fixed golden-angle
//! cloud that ignores the face entirely.

use crate::session::{Session, SessionState};
use crate::types::{Detection, Snapshot};
use serde::Serialize;

/// Frame size assumed when the camera has not reported one yet.
pub const DEFAULT_FRAME_SIZE: (u32, u32) = (1280, 720);

const GOLDEN_ANGLE_DEG: f32 = 137.5;
const SPIRAL_BASE_RADIUS: f32 = 22.0;
const SPIRAL_RADIUS_STEP: f32 = 2.2;
const SPIRAL_CENTER: (f32, f32) = (50.0, 45.0);
const SPIRAL_Y_SQUASH: f32 = 0.75;
const SAFE_X: (f32, f32) = (8.0, 92.0);
const SAFE_Y: (f32, f32) = (12.0, 88.0);
/// Vertical gap between the chin and the primary tag.
const PRIMARY_TAG_OFFSET_Y: f32 = 5.0;
const CASCADE_DELAY_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TagPosition {
    pub x: f32,
    pub y: f32,
}

/// Primary tag anchor: centre-bottom of the face, mirrored horizontally.
///
/// Uses the live detection when there is one so the tag follows the head,
/// falls back to the snapshot if the face is momentarily lost, and to the
/// screen centre if neither exists.
pub fn primary_tag_position(
    live: Option<&Detection>,
    snapshot: Option<&Snapshot>,
    frame_size: (u32, u32),
) -> TagPosition {
    let Some(bbox) = live
        .map(|d| &d.bbox)
        .or_else(|| snapshot.map(|s| &s.detection.bbox))
    else {
        return TagPosition { x: 50.0, y: 50.0 };
    };

    let (w, h) = effective_frame_size(frame_size);
    TagPosition {
        x: 100.0 - bbox.center_x() / w * 100.0,
        y: bbox.bottom() / h * 100.0 + PRIMARY_TAG_OFFSET_Y,
    }
}

/// Fixed position of alternative tag `index` on a golden-angle spiral.
///
/// Deterministic in its inputs; `total` does not currently change the result.
pub fn alternative_tag_position(index: usize, _total: usize) -> TagPosition {
    let radius = SPIRAL_BASE_RADIUS + index as f32 * SPIRAL_RADIUS_STEP;
    let theta = (index as f32 * GOLDEN_ANGLE_DEG).to_radians();

    let x = SPIRAL_CENTER.0 + radius * theta.cos();
    let y = SPIRAL_CENTER.1 + radius * SPIRAL_Y_SQUASH * theta.sin();

    TagPosition {
        x: x.clamp(SAFE_X.0, SAFE_X.1),
        y: y.clamp(SAFE_Y.0, SAFE_Y.1),
    }
}

fn effective_frame_size((w, h): (u32, u32)) -> (f32, f32) {
    let w = if w == 0 { DEFAULT_FRAME_SIZE.0 } else { w };
    let h = if h == 0 { DEFAULT_FRAME_SIZE.1 } else { h };
    (w as f32, h as f32)
}

/// Colour family of a tag, derived from its gender text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagTone {
    Male,
    Female,
    Neutral,
}

impl TagTone {
    pub fn from_gender(gender: &str) -> Self {
        let g = gender.to_lowercase();
        if g.contains("female") {
            TagTone::Female
        } else if g.contains("male") {
            TagTone::Male
        } else {
            TagTone::Neutral
        }
    }
}

/// A tag ready to be drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedTag {
    pub primary: bool,
    /// Collapsed label, e.g. `female/24yo`.
    pub label: String,
    pub text: String,
    pub bias_type: String,
    pub tags: Vec<String>,
    pub tone: TagTone,
    pub position: TagPosition,
    /// Expanded card opens to the left of the anchor.
    pub anchor_right: bool,
    /// Expanded card opens above the anchor.
    pub anchor_bottom: bool,
    pub delay_ms: u32,
}

/// Keep digits, `s` and `+` from a generated age ("late 20s" → "20s").
pub fn display_age(age: &str) -> String {
    let clean: String = age
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 's' || *c == '+')
        .collect();
    if clean.is_empty() {
        age.to_string()
    } else {
        clean
    }
}

fn tag_label(gender: &str, age: &str) -> String {
    let gender = if gender.is_empty() { "neutral" } else { gender };
    format!("{}/{}", gender.to_lowercase(), age)
}

/// All tags for the Displaying state; empty in any other state.
pub fn layout_tags(session: &Session, frame_size: (u32, u32)) -> Vec<PlacedTag> {
    let (Some(response), Some(snapshot)) = (session.response(), session.snapshot()) else {
        return Vec::new();
    };
    if session.state() != SessionState::Displaying {
        return Vec::new();
    }

    let mut tags = Vec::with_capacity(response.alternatives.len() + 1);

    let locked = &snapshot.detection;
    let gender = locked.gender.to_string();
    let position = primary_tag_position(session.live(), Some(snapshot), frame_size);
    tags.push(PlacedTag {
        primary: true,
        label: tag_label(&gender, &format!("{}yo", locked.age.round() as i64)),
        text: response.primary_identity.bio.clone(),
        bias_type: "PRIMARY MATCH".to_string(),
        tags: response.primary_identity.tags.clone(),
        tone: TagTone::from_gender(&gender),
        position,
        anchor_right: position.x > 50.0,
        anchor_bottom: position.y > 60.0,
        delay_ms: 0,
    });

    let total = response.alternatives.len();
    for (i, alt) in response.alternatives.iter().enumerate() {
        let position = alternative_tag_position(i, total);
        tags.push(PlacedTag {
            primary: false,
            label: tag_label(&alt.gender, &display_age(&alt.age)),
            text: alt.text.clone(),
            bias_type: alt.bias_type.clone(),
            tags: Vec::new(),
            tone: TagTone::from_gender(&alt.gender),
            position,
            anchor_right: position.x > 50.0,
            anchor_bottom: position.y > 60.0,
            delay_ms: i as u32 * CASCADE_DELAY_MS,
        });
    }

    tags
}
