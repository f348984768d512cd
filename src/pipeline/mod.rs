mod controller;
mod timings;

pub use controller::{FramePipeline, RenderEvent};
