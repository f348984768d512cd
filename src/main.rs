mod capture;
mod output;
mod pipeline;
mod segmentation;
mod tracking;

use anyhow::{Context, Result};
use capture::{CaptureSource, WebcamCapture};
use clap::Parser;
use image::RgbImage;
use output::{FrameSink, V4L2Output};
use pipeline::{FramePipeline, RenderEvent};
use segmentation::{Preprocessor, Rotation};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracking::{FrameCanvas, OverlayTracker};

/// Log the performance overlay every this many completed frames
const STATS_INTERVAL: u64 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Camera preview width
    #[arg(long, default_value_t = 640)]
    capture_width: u32,

    /// Camera preview height
    #[arg(long, default_value_t = 480)]
    capture_height: u32,

    /// Model input width
    #[arg(long, default_value_t = 256)]
    input_width: u32,

    /// Model input height
    #[arg(long, default_value_t = 256)]
    input_height: u32,

    /// Path to the segmentation model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Newline-delimited label list, one label per class
    #[arg(long)]
    labels: PathBuf,

    /// Number of classes the model predicts (defaults to the label count)
    #[arg(long)]
    num_classes: Option<usize>,

    /// Sensor rotation relative to the display, in degrees
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    sensor_rotation: i32,

    /// Centre-crop instead of stretching frames to the model input
    #[arg(long)]
    maintain_aspect: bool,

    /// Intra-op threads for the inference engine
    #[arg(long, default_value_t = 4)]
    intra_threads: usize,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("segment-overlay starting");
    tracing::info!("Preview: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Model input: {}x{}", args.input_width, args.input_height);

    let rotation = Rotation::from_degrees(args.sensor_rotation)?;
    let input_size = (args.input_width, args.input_height);

    let segmentor = segmentation::create_default_model(
        &args.model,
        &args.labels,
        args.num_classes,
        input_size,
        args.intra_threads,
    )
    .inspect_err(|err| tracing::error!("Segmentor could not be initialized: {}", err))
    .context("Segmentor could not be initialized")?;

    // Initialize capture
    let mut capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        rotation,
    )
    .context("Failed to initialize webcam capture")?;
    let preview_size = capture.resolution();

    // Initialize output at the preview size, so the overlay lands unscaled
    let mut output = V4L2Output::new(&args.output_device, preview_size.0, preview_size.1)
        .context("Failed to initialize v4l2loopback output")?;

    let preprocessor = Preprocessor::new(
        preview_size,
        input_size,
        capture.sensor_rotation(),
        args.maintain_aspect,
    )?;
    let top_left = preprocessor.crop_to_frame().apply(0.0, 0.0);
    let bottom_right = preprocessor
        .crop_to_frame()
        .apply(input_size.0 as f32, input_size.1 as f32);
    tracing::debug!(
        "Model input covers preview region {:?} to {:?}",
        top_left,
        bottom_right
    );

    // The overlay is drawn back onto the camera frame it was cropped from
    let tracker = Arc::new(
        OverlayTracker::new(preview_size, segmentor.labels().to_vec())
            .with_raster_size(input_size.0, input_size.1)
            .with_placement(*preprocessor.crop_to_frame()),
    );

    let (events_tx, events) = mpsc::channel();
    let pipeline = FramePipeline::new(segmentor, preprocessor, preview_size, tracker, events_tx)
        .context("Failed to start frame pipeline")?;

    // Main loop
    run_pipeline(&mut capture, &mut output, pipeline, events, args.fps)
}

fn run_pipeline<C, O>(
    capture: &mut C,
    output: &mut O,
    mut pipeline: FramePipeline,
    events: Receiver<RenderEvent>,
    target_fps: u32,
) -> Result<()>
where
    C: CaptureSource,
    O: FrameSink,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let renderer = pipeline.renderer();
    let (width, height) = capture.resolution();
    let mut results = 0u64;

    tracing::info!("Starting main pipeline loop, output {:?}", output.resolution());
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;

        // Keep the camera pixels for display; the buffer itself goes back to the source
        let preview = RgbImage::from_raw(width, height, frame.data().to_vec())
            .context("Camera frame does not match the preview size")?;

        if let Err(err) = pipeline.process_frame(capture, frame) {
            tracing::warn!("{:#}", err);
        }

        let mut log_stats = false;
        for event in events.try_iter() {
            if let RenderEvent::ResultsReady { timestamp } = event {
                results += 1;
                if results % STATS_INTERVAL == 0 {
                    log_stats = true;
                    let stats = pipeline.stats();
                    tracing::info!(
                        "Frame {}: {} captured, {} dropped, {} failed",
                        timestamp,
                        stats.captured,
                        stats.dropped,
                        stats.failed
                    );
                }
            }
        }

        let mut canvas = FrameCanvas::new(preview);
        renderer.draw(&mut canvas);
        if log_stats {
            for line in canvas.text_lines() {
                tracing::info!("  {}", line);
            }
        }
        output
            .write_frame(canvas.image())
            .context("Failed to write frame")?;

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
