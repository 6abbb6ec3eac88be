//! 68-point facial landmark regressor via ONNX Runtime.
//!
//! Expects a PFLD-style model: a 112×112 RGB crop scaled to [0, 1], returning
//! 136 values (x, y pairs) normalized to the crop.

use crate::analyzer::{first_output, load_session, AnalyzerError, ModelLoadError};
use crate::crop::{crop_resize, CropRegion};
use crate::types::{BoundingBox, Point, LANDMARK_COUNT};
use ndarray::Array4;
use ort::session::Session;
use std::path::Path;

const LANDMARK_INPUT_SIZE: usize = 112;
/// Crop side relative to the larger box dimension.
const LANDMARK_CROP_EXPAND: f32 = 1.2;

pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        Ok(Self {
            session: load_session("landmark-68", model_path)?,
        })
    }

    /// Regress 68 landmarks for the face in `bbox`, in frame coordinates.
    pub fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        bbox: &BoundingBox,
    ) -> Result<Vec<Point>, AnalyzerError> {
        let region = CropRegion::around(bbox, LANDMARK_CROP_EXPAND);
        let crop = crop_resize(frame, width as usize, height as usize, &region, LANDMARK_INPUT_SIZE);
        let input = to_rgb_tensor(&crop, LANDMARK_INPUT_SIZE, 1.0 / 255.0);

        let values = first_output(&mut self.session, input)?;
        decode_landmarks(&values, &region)
    }
}

/// Replicate a grayscale crop into a 1×3×N×N tensor, multiplying by `scale`.
pub(crate) fn to_rgb_tensor(crop: &[u8], size: usize, scale: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let v = crop[y * size + x] as f32 * scale;
            tensor[[0, 0, y, x]] = v;
            tensor[[0, 1, y, x]] = v;
            tensor[[0, 2, y, x]] = v;
        }
    }
    tensor
}

fn decode_landmarks(values: &[f32], region: &CropRegion) -> Result<Vec<Point>, AnalyzerError> {
    if values.len() < LANDMARK_COUNT * 2 {
        return Err(AnalyzerError::OutputShape {
            model: "landmark-68",
            expected: LANDMARK_COUNT * 2,
            actual: values.len(),
        });
    }
    Ok(values[..LANDMARK_COUNT * 2]
        .chunks_exact(2)
        .map(|uv| {
            let (x, y) = region.to_frame(uv[0], uv[1]);
            Point::new(x, y)
        })
        .collect())
}
