mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbImage;

/// Destination for composited preview frames
///
/// Frames whose size differs from `resolution()` are scaled to fit by the sink.
pub trait FrameSink {
    /// Push one composited frame, blocking until the sink has accepted it
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Size (width, height) of the frames the sink emits
    fn resolution(&self) -> (u32, u32);
}
