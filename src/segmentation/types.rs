use anyhow::Result;
use image::RgbImage;
use std::time::Duration;

/// Per-pixel class prediction for one model-input frame.
///
/// `pixel_classes` is row-major: the class of pixel (x, y) lives at
/// `y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    pixel_classes: Vec<u32>,
    width: u32,
    height: u32,
    num_classes: usize,
    inference_time: Duration,
    native_time: Duration,
}

impl SegmentationResult {
    pub fn new(
        pixel_classes: Vec<u32>,
        width: u32,
        height: u32,
        num_classes: usize,
        inference_time: Duration,
        native_time: Duration,
    ) -> Self {
        Self {
            pixel_classes,
            width,
            height,
            num_classes,
            inference_time,
            native_time,
        }
    }

    pub fn pixel_classes(&self) -> &[u32] {
        &self.pixel_classes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Wall-clock time of the whole adapter call
    pub fn inference_time(&self) -> Duration {
        self.inference_time
    }

    /// Time spent inside the inference engine itself
    pub fn native_time(&self) -> Duration {
        self.native_time
    }
}

/// Trait for semantic segmentation backends
///
/// Implementations own their scratch buffers and are not expected to be
/// called concurrently; the frame pipeline guarantees one call at a time.
pub trait Segmentor: Send {
    /// Run the model on one preprocessed frame
    ///
    /// # Arguments
    /// * `frame` - RGB raster whose dimensions equal `input_size()`
    ///
    /// # Returns
    /// * Row-major class index per pixel, with the adapter and engine timings
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationResult>;

    /// Label table, indexed by class
    fn labels(&self) -> &[String];

    /// Model input geometry (width, height)
    fn input_size(&self) -> (u32, u32);

    fn num_classes(&self) -> usize {
        self.labels().len()
    }
}
