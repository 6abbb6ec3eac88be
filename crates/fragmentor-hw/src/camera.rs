//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Default capture size, matching a typical 720p webcam.
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y channel is the grayscale image.
    Yuyv,
    /// Motion-JPEG, the usual webcam format at 720p and above.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device (e.g. "/dev/video0") and request
    /// `width`×`height`. The driver may negotiate a different size; the
    /// negotiated one is what frames report.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        // Prefer YUYV (cheap Y extraction); fall back to MJPG when the driver
        // can't do YUYV at this size.
        let mut negotiated = None;
        for fourcc in [b"YUYV", b"MJPG"] {
            fmt.fourcc = FourCC::new(fourcc);
            fmt.width = width;
            fmt.height = height;
            let got = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if let Some(pf) = PixelFormat::from_fourcc(got.fourcc) {
                negotiated = Some((got, pf));
                break;
            }
        }
        let Some((got, pixel_format)) = negotiated else {
            return Err(CameraError::FormatNegotiationFailed(
                "no supported pixel format (need YUYV, MJPG, GREY or Y16)".to_string(),
            ));
        };

        if (got.width, got.height) != (width, height) {
            tracing::warn!(
                requested_width = width,
                requested_height = height,
                width = got.width,
                height = got.height,
                "camera negotiated a different size"
            );
        }
        tracing::info!(
            width = got.width,
            height = got.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: got.width,
            height: got.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture a single grayscale frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        self.next_frame(&mut stream)
    }

    /// Capture `count` consecutive frames from one stream. Used for
    /// diagnostics; dark frames are kept and flagged.
    pub fn capture_frames(&self, count: usize) -> Result<Vec<Frame>, CameraError> {
        let mut stream = self.stream()?;
        (0..count).map(|_| self.next_frame(&mut stream)).collect()
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    fn next_frame(&self, stream: &mut MmapStream<'_>) -> Result<Frame, CameraError> {
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let data = self.to_grayscale(&buf[..(meta.bytesused as usize).min(buf.len())])?;
        let is_dark = frame::is_dark_frame(&data, 0.95);

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let (w, h) = (self.width, self.height);
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, w, h),
            PixelFormat::Mjpeg => frame::mjpeg_to_grayscale(buf, w, h),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, w, h),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, w, h),
        };
        converted.map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_open_missing_device() {
        match Camera::open("/dev/fragmentor-does-not-exist", DEFAULT_WIDTH, DEFAULT_HEIGHT) {
            Err(CameraError::DeviceNotFound(path)) => {
                assert_eq!(path, "/dev/fragmentor-does-not-exist")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("open should fail"),
        }
    }
}
