//! Frame type and pixel-format conversion to 8-bit grayscale.

use image::ImageFormat;

/// A captured grayscale camera frame, unmirrored.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg decode: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded {actual:?}, expected {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(yuyv, expected)?;
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    check_len(grey, expected)?;
    Ok(grey[..expected].to_vec())
}

/// 16-bit little-endian samples, keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(y16, expected)?;
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Decode one MJPG frame and convert it to luma.
pub fn mjpeg_to_grayscale(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.into_luma8();
    if img.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: img.dimensions(),
        });
    }
    Ok(img.into_raw())
}

/// True if more than `threshold_pct` of pixels are near black (< 32).
///
/// Webcams commonly deliver a few black frames right after stream start.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}
