//! Square face crops with bilinear resampling, shared by the per-face models.

use crate::types::BoundingBox;

/// A square region in frame coordinates, possibly extending past the frame edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl CropRegion {
    /// Square centred on `bbox`, side = `max(width, height) * expand`.
    pub fn around(bbox: &BoundingBox, expand: f32) -> Self {
        let size = bbox.width.max(bbox.height) * expand;
        Self {
            x: bbox.center_x() - size / 2.0,
            y: bbox.y + bbox.height / 2.0 - size / 2.0,
            size,
        }
    }

    /// Map a point given in normalized crop coordinates ([0, 1]) back to the frame.
    pub fn to_frame(&self, u: f32, v: f32) -> (f32, f32) {
        (self.x + u * self.size, self.y + v * self.size)
    }
}

/// Resample `region` of a grayscale frame into an `out_size`×`out_size` buffer.
///
/// Pixels outside the frame read as 0 (black).
pub fn crop_resize(
    frame: &[u8],
    width: usize,
    height: usize,
    region: &CropRegion,
    out_size: usize,
) -> Vec<u8> {
    let mut output = vec![0u8; out_size * out_size];
    if out_size == 0 || width == 0 || height == 0 || region.size <= 0.0 {
        return output;
    }
    let step = region.size / out_size as f32;

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < width as i32 && y >= 0 && y < height as i32 {
            frame[y as usize * width + x as usize] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        let sy = region.y + (oy as f32 + 0.5) * step - 0.5;
        let y0 = sy.floor() as i32;
        let fy = sy - y0 as f32;

        for ox in 0..out_size {
            let sx = region.x + (ox as f32 + 0.5) * step - 0.5;
            let x0 = sx.floor() as i32;
            let fx = sx - x0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}
