mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use crate::segmentation::Rotation;
use anyhow::Result;

/// One raw preview frame: packed RGB bytes, row-major, no padding
///
/// The buffer belongs to the capture source and must be handed back with
/// [`CaptureSource::release_frame`] once its pixels have been copied.
#[derive(Debug)]
pub struct CapturedFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame at the preview resolution
    fn capture_frame(&mut self) -> Result<CapturedFrame>;

    /// Return a frame's buffer so the source can reuse it
    fn release_frame(&mut self, frame: CapturedFrame);

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    /// Rotation of the sensor relative to the display
    fn sensor_rotation(&self) -> Rotation {
        Rotation::Deg0
    }
}
