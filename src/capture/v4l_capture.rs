use super::{CaptureSource, CapturedFrame};
use crate::segmentation::Rotation;
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

/// Frames kept for reuse; more than this in flight are simply reallocated
const BUFFER_POOL_SIZE: usize = 3;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    rotation: Rotation,
    pool: Vec<Vec<u8>>,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32, rotation: Rotation) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{} (sensor rotation {})",
            device_index,
            width,
            height,
            rotation.degrees()
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        if (actual.width(), actual.height()) != (width, height) {
            tracing::warn!(
                "Camera delivers {}x{} instead of the requested {}x{}",
                actual.width(),
                actual.height(),
                width,
                height
            );
        }

        tracing::info!("Webcam initialized successfully");

        Ok(Self {
            camera,
            width: actual.width(),
            height: actual.height(),
            rotation,
            pool: Vec::with_capacity(BUFFER_POOL_SIZE),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<CapturedFrame> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        let len = (self.width * self.height * 3) as usize;
        let mut data = self.pool.pop().unwrap_or_default();
        data.resize(len, 0);

        frame
            .decode_image_to_buffer::<RgbFormat>(&mut data)
            .context("Failed to decode frame")?;

        Ok(CapturedFrame::new(self.width, self.height, data))
    }

    fn release_frame(&mut self, frame: CapturedFrame) {
        if self.pool.len() < BUFFER_POOL_SIZE {
            self.pool.push(frame.into_data());
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn sensor_rotation(&self) -> Rotation {
        self.rotation
    }
}
