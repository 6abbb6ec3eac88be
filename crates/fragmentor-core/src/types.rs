use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Number of points in a face landmark set (iBUG 300-W / Multi-PIE layout).
pub const LANDMARK_COUNT: usize = 68;

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

/// A 2D point in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding box for a detected face, in raw (unmirrored) frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// The 68 facial landmarks of one face, in frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    points: Vec<Point>,
}

impl Landmarks {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }
}

/// Per-expression scores, kept in the order the classifier produced them.
///
/// Order matters: [`ExpressionScores::dominant`] breaks ties in favour of the
/// first label encountered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionScores {
    entries: Vec<(String, f32)>,
}

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a score, replacing an existing label in place or appending a new one.
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((label, score)),
        }
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(l, s)| (l.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label with the maximum score; the first one wins on a tie.
    pub fn dominant(&self) -> Option<&str> {
        let mut best: Option<(&str, f32)> = None;
        for (label, score) in self.iter() {
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((label, score)),
            }
        }
        best.map(|(label, _)| label)
    }
}

impl<L: Into<String>> FromIterator<(L, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (L, f32)>>(iter: I) -> Self {
        let mut scores = Self::new();
        for (label, score) in iter {
            scores.insert(label, score);
        }
        scores
    }
}

impl Serialize for ExpressionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, score) in &self.entries {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExpressionScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = ExpressionScores;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of expression label to score")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut scores = ExpressionScores::new();
                while let Some((label, score)) = access.next_entry::<String, f32>()? {
                    scores.insert(label, score);
                }
                Ok(scores)
            }
        }

        deserializer.deserialize_map(ScoresVisitor)
    }
}

/// Perceived gender as reported by the age/gender model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

/// One face analysis result for one frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub expressions: ExpressionScores,
    /// Estimated age in years.
    pub age: f32,
    pub gender: Gender,
    /// Probability of `gender` in [0, 1].
    pub gender_probability: f32,
}

/// Unvalidated analysis output, as assembled from model post-processing.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    pub expressions: Vec<(String, f32)>,
    pub age: f32,
    pub gender: Gender,
    pub gender_probability: f32,
}

#[derive(Error, Debug, PartialEq)]
pub enum InvalidDetection {
    #[error("bounding box is degenerate: {0:?}")]
    DegenerateBox(BoundingBox),
    #[error("expected {LANDMARK_COUNT} landmarks, got {0}")]
    LandmarkCount(usize),
    #[error("landmark {0} is not finite")]
    NonFiniteLandmark(usize),
    #[error("no expression scores")]
    NoExpressions,
    #[error("age is not finite")]
    NonFiniteAge,
}

impl Detection {
    /// Validate and normalize raw model output.
    ///
    /// Rejects degenerate boxes, wrong landmark counts and non-finite values.
    /// Expression scores are clamped to [0, 1] and renormalized to sum to 1;
    /// confidence and gender probability are clamped; age is floored at 0.
    pub fn try_from_raw(raw: RawDetection) -> Result<Self, InvalidDetection> {
        let b = raw.bbox;
        let box_ok = [b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite())
            && b.width > 0.0
            && b.height > 0.0;
        if !box_ok {
            return Err(InvalidDetection::DegenerateBox(b));
        }

        if raw.landmarks.len() != LANDMARK_COUNT {
            return Err(InvalidDetection::LandmarkCount(raw.landmarks.len()));
        }
        if let Some(i) = raw
            .landmarks
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(InvalidDetection::NonFiniteLandmark(i));
        }

        if raw.expressions.is_empty() {
            return Err(InvalidDetection::NoExpressions);
        }
        if !raw.age.is_finite() {
            return Err(InvalidDetection::NonFiniteAge);
        }

        let clamped: Vec<(String, f32)> = raw
            .expressions
            .into_iter()
            .map(|(label, s)| (label, if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 }))
            .collect();
        let total: f32 = clamped.iter().map(|(_, s)| s).sum();
        let expressions = if total > 0.0 {
            clamped.into_iter().map(|(l, s)| (l, s / total)).collect()
        } else {
            clamped.into_iter().collect()
        };

        Ok(Self {
            bbox: BoundingBox {
                confidence: clamp_unit(b.confidence),
                ..b
            },
            landmarks: Landmarks {
                points: raw.landmarks,
            },
            expressions,
            age: raw.age.max(0.0),
            gender: raw.gender,
            gender_probability: clamp_unit(raw.gender_probability),
        })
    }

    /// Dominant expression label, or `"neutral"` if no scores are present.
    pub fn dominant_expression(&self) -> &str {
        self.expressions.dominant().unwrap_or("neutral")
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Point-in-time copy of a detection taken when a generation cycle starts.
///
/// Owns its data: later live detections never alter it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub detection: Detection,
    pub expression: String,
}

impl Snapshot {
    pub fn capture(live: &Detection) -> Self {
        Self {
            expression: live.dominant_expression().to_string(),
            detection: live.clone(),
        }
    }
}

/// Attributes sent to the identity generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityInput {
    pub age: f32,
    pub gender: Gender,
    pub gender_probability: f32,
    pub expressions: ExpressionScores,
}

impl From<&Snapshot> for IdentityInput {
    fn from(snapshot: &Snapshot) -> Self {
        let d = &snapshot.detection;
        Self {
            age: d.age,
            gender: d.gender,
            gender_probability: d.gender_probability,
            expressions: d.expressions.clone(),
        }
    }
}

/// The generated identity considered the accurate match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryIdentity {
    pub bio: String,
    pub tags: Vec<String>,
    pub match_score: f32,
}

/// A deliberately wrong or biased identity guess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFragment {
    pub text: String,
    pub gender: String,
    /// Numeric-leaning age text such as `"25"`, `"30s"` or `"40+"`.
    pub age: String,
    pub bias_type: String,
}

/// Structured output of the identity generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub primary_identity: PrimaryIdentity,
    /// Required, but of any length including 0.
    pub alternatives: Vec<IdentityFragment>,
}

/// What one generation call produced.
///
/// `response` is always usable: on failure it holds the generator's fallback
/// identity and `failure` describes what went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub response: AiResponse,
    pub failure: Option<String>,
}

impl GenerationOutcome {
    pub fn success(response: AiResponse) -> Self {
        Self {
            response,
            failure: None,
        }
    }

    pub fn failed(fallback: AiResponse, reason: impl Into<String>) -> Self {
        Self {
            response: fallback,
            failure: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
