//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Only the boxes
//! are decoded; the five SCRFD keypoints are not needed because the 68-point
//! landmark model runs on the box crop.

use crate::analyzer::{load_session, AnalyzerError, ModelLoadError};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

pub struct FaceDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        let session = load_session("SCRFD", model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(ModelLoadError::UnexpectedShape {
                model: "SCRFD",
                detail: format!(
                    "requires at least 6 outputs (3 strides × score/bbox), got {}",
                    output_names.len()
                ),
            });
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in a grayscale frame, best first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let (width, height) = (width as usize, height as usize);
        if width == 0 || height == 0 || frame.len() < width * height {
            return Err(AnalyzerError::BadFrame {
                expected: width * height,
                actual: frame.len(),
            });
        }

        let (input, letterbox) = preprocess(frame, width, height);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>()?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>()?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into the SCRFD NCHW input tensor.
fn preprocess(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, LetterboxInfo) {
    let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).min(SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as usize).min(SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;
    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let inv_scale = 1.0 / scale;

    for y in 0..new_h {
        // Nearest-neighbour is enough for a 640 detector input.
        let src_y = (((y as f32 + 0.5) * inv_scale) as usize).min(height - 1);
        for x in 0..new_w {
            let src_x = (((x as f32 + 0.5) * inv_scale) as usize).min(width - 1);
            let normalized = (frame[src_y * width + src_x] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (ty, tx) = (y + pad_y_start, x + pad_x_start);
            tensor[[0, 0, ty, tx]] = normalized;
            tensor[[0, 1, ty, tx]] = normalized;
            tensor[[0, 2, ty, tx]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map output names to stride slots.
///
/// Recognizes `score_8` / `bbox_8` style names; otherwise assumes the standard
/// positional ordering `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let off = idx * 4;
        let Some(d) = bboxes.get(off..off + 4) else {
            continue;
        };

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * s;
        let anchor_cy = (anchor_idx / grid_w) as f32 * s;

        let x1 = (anchor_cx - d[0] * s - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_cy - d[1] * s - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_cx + d[2] * s - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_cy + d[3] * s - letterbox.pad_y) / letterbox.scale;

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression; returns survivors sorted by confidence, best first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_back_through_letterbox() {
        // 1280x720 → scale 0.5, pad_y 140.
        let letterbox = LetterboxInfo { scale: 0.5, pad_x: 0.0, pad_y: 140.0 };
        let stride = 32;
        let grid_w = SCRFD_INPUT_SIZE / stride;
        let anchors = grid_w * grid_w * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];

        // Anchor cell (row 5, col 10) → centre (320, 160) in input space.
        let idx = (5 * grid_w + 10) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 0.5, 1.0, 1.5]);

        let dets = decode_stride(&scores, &bboxes, stride, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert!((d.x - 576.0).abs() < 1e-3, "x = {}", d.x);
        assert!((d.y - 8.0).abs() < 1e-3, "y = {}", d.y);
        assert!((d.width - 128.0).abs() < 1e-3);
        assert!((d.height - 128.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = vec![255u8; 64 * 32];
        let (tensor, lb) = preprocess(&frame, 64, 32);
        assert_eq!(lb.scale, 10.0);
        assert_eq!(lb.pad_y, 160.0);
        // Padding normalizes to 0.0, image area to (255 - 127.5) / 128.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!((tensor[[0, 1, 320, 320]] - 127.5 / 128.0).abs() < 1e-6);
    }
}
