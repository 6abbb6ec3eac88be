//! Face analysis pipeline and the detector adapter used by the poll loop.
//!
//! [`OnnxFaceAnalyzer`] chains SCRFD detection, 68-point landmarks, expression
//! classification and age/gender estimation for the single best face.
//! [`DetectorAdapter`] wraps any [`Analyzer`] and turns per-frame failures into
//! "no detection" so one bad frame never reaches the caller.

use crate::attributes::{AgeGenderEstimator, ExpressionClassifier};
use crate::detector::FaceDetector;
use crate::landmarks::LandmarkRegressor;
use crate::types::{Detection, InvalidDetection, RawDetection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to load model resources. Fatal for the session; never retried.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{model} model not found at {path}; place the ONNX file in the model directory")]
    NotFound { model: &'static str, path: String },
    #[error("{model} model has an unexpected shape: {detail}")]
    UnexpectedShape { model: &'static str, detail: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Failure while analyzing a single frame.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("{model} output too short: expected {expected} values, got {actual}")]
    OutputShape {
        model: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid detection: {0}")]
    Invalid(#[from] InvalidDetection),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locations of the four ONNX models.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub expression: PathBuf,
    pub age_gender: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join("det_10g.onnx"),
            landmarks: dir.join("landmark_68.onnx"),
            expression: dir.join("emotion_ferplus.onnx"),
            age_gender: dir.join("genderage.onnx"),
        }
    }
}

/// Single-face analysis of one grayscale frame.
pub trait Analyzer {
    fn analyze(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, AnalyzerError>;
}

pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    landmarks: LandmarkRegressor,
    expression: ExpressionClassifier,
    age_gender: AgeGenderEstimator,
}

impl OnnxFaceAnalyzer {
    /// Load all four models. Blocking; run it off the async runtime.
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelLoadError> {
        Ok(Self {
            detector: FaceDetector::load(&paths.detector)?,
            landmarks: LandmarkRegressor::load(&paths.landmarks)?,
            expression: ExpressionClassifier::load(&paths.expression)?,
            age_gender: AgeGenderEstimator::load(&paths.age_gender)?,
        })
    }
}

impl Analyzer for OnnxFaceAnalyzer {
    fn analyze(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, AnalyzerError> {
        // Single face: the highest-confidence box after NMS.
        let Some(bbox) = self.detector.detect(gray, width, height)?.into_iter().next() else {
            return Ok(None);
        };

        let landmarks = self.landmarks.predict(gray, width, height, &bbox)?;
        let expressions = self.expression.classify(gray, width, height, &bbox)?;
        let ag = self.age_gender.estimate(gray, width, height, &bbox)?;

        let detection = Detection::try_from_raw(RawDetection {
            bbox,
            landmarks,
            expressions,
            age: ag.age,
            gender: ag.gender,
            gender_probability: ag.probability,
        })?;
        Ok(Some(detection))
    }
}

/// Never-failing front of an [`Analyzer`].
pub struct DetectorAdapter<A> {
    analyzer: A,
    failed_frames: u64,
}

impl<A: Analyzer> DetectorAdapter<A> {
    pub fn new(analyzer: A) -> Self {
        Self {
            analyzer,
            failed_frames: 0,
        }
    }

    /// Analyze a frame; any internal error yields `None` for this frame.
    pub fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Option<Detection> {
        match self.analyzer.analyze(gray, width, height) {
            Ok(detection) => detection,
            Err(e) => {
                self.failed_frames += 1;
                tracing::debug!(error = %e, failed_frames = self.failed_frames, "frame analysis failed; skipping");
                None
            }
        }
    }

    /// Number of frames whose analysis failed since creation.
    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }
}

pub(crate) fn load_session(model: &'static str, path: &Path) -> Result<Session, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::NotFound {
            model,
            path: path.display().to_string(),
        });
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?;

    tracing::info!(
        model,
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );
    Ok(session)
}

/// Run a single-input model and copy out its first output tensor.
pub(crate) fn first_output(
    session: &mut Session,
    input: Array4<f32>,
) -> Result<Vec<f32>, AnalyzerError> {
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
    let (_, values) = outputs[0].try_extract_tensor::<f32>()?;
    Ok(values.to_vec())
}
