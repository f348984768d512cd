mod overlay;
mod palette;
mod surface;

pub use overlay::OverlayTracker;
pub use surface::{FrameCanvas, RenderSurface};
