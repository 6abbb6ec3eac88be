//! fragmentor-hw — Webcam capture for the face HUD.
//!
//! Opens a V4L2 device at the requested size and hands out grayscale frames
//! in raw (unmirrored) sensor orientation.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
