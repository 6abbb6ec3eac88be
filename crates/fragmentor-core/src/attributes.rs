//! Expression and age/gender estimators via ONNX Runtime.
//!
//! Expression: FER+ (`emotion-ferplus`), 64×64 grayscale crop, eight logits.
//! Age/gender: InsightFace `genderage`, 96×96 crop, outputs
//! `[female, male, age / 100]`.

use crate::analyzer::{first_output, load_session, AnalyzerError, ModelLoadError};
use crate::crop::{crop_resize, CropRegion};
use crate::landmarks::to_rgb_tensor;
use crate::types::{BoundingBox, Gender};
use ndarray::Array4;
use ort::session::Session;
use std::path::Path;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_CROP_EXPAND: f32 = 1.0;
/// FER+ output order mapped to display labels. `None` entries are dropped.
const FERPLUS_LABELS: [Option<&str>; 8] = [
    Some("neutral"),
    Some("happy"),
    Some("surprised"),
    Some("sad"),
    Some("angry"),
    Some("disgusted"),
    Some("fearful"),
    None, // contempt
];
/// Order in which expressions are reported.
const EXPRESSION_ORDER: [&str; 7] = [
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

const GENDERAGE_INPUT_SIZE: usize = 96;
const GENDERAGE_CROP_EXPAND: f32 = 1.5;

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        Ok(Self {
            session: load_session("emotion-ferplus", model_path)?,
        })
    }

    /// Expression probabilities in reporting order.
    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        bbox: &BoundingBox,
    ) -> Result<Vec<(String, f32)>, AnalyzerError> {
        let region = CropRegion::around(bbox, FERPLUS_CROP_EXPAND);
        let crop = crop_resize(frame, width as usize, height as usize, &region, FERPLUS_INPUT_SIZE);

        // FER+ takes raw 0–255 grayscale, single channel.
        let input = Array4::from_shape_vec(
            (1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE),
            crop.iter().map(|&p| p as f32).collect(),
        )
        .map_err(|e| AnalyzerError::Inference(e.to_string()))?;

        let logits = first_output(&mut self.session, input)?;
        expression_scores(&logits)
    }
}

fn expression_scores(logits: &[f32]) -> Result<Vec<(String, f32)>, AnalyzerError> {
    if logits.len() < FERPLUS_LABELS.len() {
        return Err(AnalyzerError::OutputShape {
            model: "emotion-ferplus",
            expected: FERPLUS_LABELS.len(),
            actual: logits.len(),
        });
    }
    let probs = softmax(&logits[..FERPLUS_LABELS.len()]);

    Ok(EXPRESSION_ORDER
        .iter()
        .map(|&label| {
            let score = FERPLUS_LABELS
                .iter()
                .position(|l| *l == Some(label))
                .map(|i| probs[i])
                .unwrap_or(0.0);
            (label.to_string(), score)
        })
        .collect())
}

/// Age in years plus gender with its probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeGender {
    pub age: f32,
    pub gender: Gender,
    pub probability: f32,
}

pub struct AgeGenderEstimator {
    session: Session,
}

impl AgeGenderEstimator {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        Ok(Self {
            session: load_session("genderage", model_path)?,
        })
    }

    pub fn estimate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        bbox: &BoundingBox,
    ) -> Result<AgeGender, AnalyzerError> {
        let region = CropRegion::around(bbox, GENDERAGE_CROP_EXPAND);
        let crop = crop_resize(frame, width as usize, height as usize, &region, GENDERAGE_INPUT_SIZE);
        // genderage was exported with mean 0 / std 1: raw pixel values.
        let input = to_rgb_tensor(&crop, GENDERAGE_INPUT_SIZE, 1.0);

        let out = first_output(&mut self.session, input)?;
        decode_age_gender(&out)
    }
}

fn decode_age_gender(out: &[f32]) -> Result<AgeGender, AnalyzerError> {
    let [female, male, age] = match out.get(..3) {
        Some(&[f, m, a]) => [f, m, a],
        _ => {
            return Err(AnalyzerError::OutputShape {
                model: "genderage",
                expected: 3,
                actual: out.len(),
            })
        }
    };
    let probs = softmax(&[female, male]);
    let (gender, probability) = if probs[1] >= probs[0] {
        (Gender::Male, probs[1])
    } else {
        (Gender::Female, probs[0])
    };
    Ok(AgeGender {
        age: age * 100.0,
        gender,
        probability,
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}
