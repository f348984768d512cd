use super::timings::{FrameTimings, PipelineCounters, PipelineStats};
use crate::capture::{CaptureSource, CapturedFrame};
use crate::segmentation::{Preprocessor, Segmentor};
use crate::tracking::{OverlayTracker, RenderSurface};
use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Redraw requests sent to whoever owns the display surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    /// A new camera frame arrived; repaint the preview
    Invalidate { timestamp: u64 },
    /// The overlay and timings for `timestamp` were published
    ResultsReady { timestamp: u64 },
    /// Work for `timestamp` failed; published state is unchanged
    Failed { timestamp: u64 },
}

/// What happened to a frame handed to [`FramePipeline::process_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Admitted { timestamp: u64 },
    Dropped { timestamp: u64 },
}

struct Job {
    timestamp: u64,
    admitted_at: Instant,
    input: RgbImage,
}

/// State shared between the capture thread, the worker and renderers
#[derive(Default)]
struct Shared {
    /// Set while a frame is between admission and completion
    computing: AtomicBool,
    timings: Mutex<Option<FrameTimings>>,
    counters: PipelineCounters,
}

/// Per-frame orchestration: admission control, sequencing, and background
/// inference
///
/// At most one frame is in flight; frames arriving while the worker is busy
/// are released straight back to the capture source and never queued.
pub struct FramePipeline {
    preprocessor: Preprocessor,
    tracker: Arc<OverlayTracker>,
    shared: Arc<Shared>,
    events: Sender<RenderEvent>,
    timestamp: u64,
    rgb_frame: RgbImage,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl FramePipeline {
    /// Start the segmentation worker
    ///
    /// # Arguments
    /// * `segmentor` - Model, moved onto the worker thread
    /// * `preprocessor` - Must produce the model's input size
    /// * `preview_size` - Size of every camera frame handed to `process_frame`
    /// * `tracker` - Receives each result; shared with renderers
    /// * `events` - Redraw requests for the display owner
    pub fn new(
        segmentor: Box<dyn Segmentor>,
        preprocessor: Preprocessor,
        preview_size: (u32, u32),
        tracker: Arc<OverlayTracker>,
        events: Sender<RenderEvent>,
    ) -> Result<Self> {
        if preprocessor.target_size() != segmentor.input_size() {
            bail!(
                "Preprocessor produces {:?} but the model expects {:?}",
                preprocessor.target_size(),
                segmentor.input_size()
            );
        }
        if segmentor.num_classes() != tracker.num_classes() {
            bail!(
                "Model has {} classes but the tracker was built for {}",
                segmentor.num_classes(),
                tracker.num_classes()
            );
        }

        let shared = Arc::new(Shared::default());
        let (jobs, queue) = mpsc::channel();

        let worker = Worker {
            segmentor,
            tracker: Arc::clone(&tracker),
            shared: Arc::clone(&shared),
            events: events.clone(),
        };
        let worker = thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || worker.run(queue))
            .context("Failed to spawn segmentation worker")?;

        Ok(Self {
            preprocessor,
            tracker,
            shared,
            events,
            timestamp: 0,
            rgb_frame: RgbImage::new(preview_size.0, preview_size.1),
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Handle one camera callback
    ///
    /// The frame is always released back to `source` before this returns,
    /// and before any inference work starts.
    ///
    /// Steps:
    /// 1. Assign the next sequence number and request a redraw
    /// 2. Claim the admission flag, or drop the frame if a result is pending
    /// 3. Copy and release the frame, preprocess, hand off to the worker
    ///
    /// # Returns
    /// * Whether the frame was admitted or dropped. An error means the frame
    ///   was admitted but could not be handed off; the flag is cleared again.
    pub fn process_frame<C: CaptureSource + ?Sized>(
        &mut self,
        source: &mut C,
        frame: CapturedFrame,
    ) -> Result<FrameOutcome> {
        self.timestamp += 1;
        let timestamp = self.timestamp;
        self.shared.counters.record_captured();
        if self.events.send(RenderEvent::Invalidate { timestamp }).is_err() {
            tracing::trace!("No renderer listening for frame {}", timestamp);
        }

        if self
            .shared
            .computing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Dropping frame {}, segmentation in progress", timestamp);
            self.shared.counters.record_dropped();
            source.release_frame(frame);
            return Ok(FrameOutcome::Dropped { timestamp });
        }

        tracing::debug!("Preparing image {} for segmentation in bg thread", timestamp);
        let admitted_at = Instant::now();

        let copied = self.copy_frame(&frame);
        source.release_frame(frame);

        let job = copied
            .and_then(|()| self.preprocessor.preprocess(&self.rgb_frame))
            .map(|input| Job {
                timestamp,
                admitted_at,
                input,
            })
            .and_then(|job| {
                self.jobs
                    .as_ref()
                    .ok_or_else(|| anyhow!("Pipeline is shut down"))?
                    .send(job)
                    .map_err(|_| anyhow!("Segmentation worker has stopped"))
            });

        if let Err(err) = job {
            self.shared.counters.record_failed();
            self.shared.computing.store(false, Ordering::Release);
            return Err(err.context(format!("Frame {} rejected", timestamp)));
        }

        Ok(FrameOutcome::Admitted { timestamp })
    }

    fn copy_frame(&mut self, frame: &CapturedFrame) -> Result<()> {
        if frame.dimensions() != self.rgb_frame.dimensions()
            || frame.data().len() != self.rgb_frame.len()
        {
            bail!(
                "Camera frame is {:?} ({} bytes), expected {:?}",
                frame.dimensions(),
                frame.data().len(),
                self.rgb_frame.dimensions()
            );
        }
        self.rgb_frame.copy_from_slice(frame.data());
        Ok(())
    }

    /// Whether a frame is currently being segmented
    pub fn is_busy(&self) -> bool {
        self.shared.computing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// Handle for drawing the published overlay from any thread
    pub fn renderer(&self) -> OverlayRenderer {
        OverlayRenderer {
            tracker: Arc::clone(&self.tracker),
            shared: Arc::clone(&self.shared),
        }
    }

    fn stop_worker(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Segmentation worker panicked");
            }
        }
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Read-only view of published results, used by render callbacks
#[derive(Clone)]
pub struct OverlayRenderer {
    tracker: Arc<OverlayTracker>,
    shared: Arc<Shared>,
}

impl OverlayRenderer {
    /// Draw the overlay and, once a frame has completed, the performance text
    pub fn draw<S: RenderSurface + ?Sized>(&self, surface: &mut S) {
        self.tracker.draw(surface);

        let Some(lines) = self.timings().map(|t| t.overlay_lines()) else {
            return;
        };
        let bottom = surface.height().saturating_sub(10);
        surface.draw_text_lines(10, bottom, &lines);
    }

    pub fn timings(&self) -> Option<FrameTimings> {
        self.shared.timings.lock().clone()
    }
}

struct Worker {
    segmentor: Box<dyn Segmentor>,
    tracker: Arc<OverlayTracker>,
    shared: Arc<Shared>,
    events: Sender<RenderEvent>,
}

impl Worker {
    fn run(mut self, queue: Receiver<Job>) {
        for job in queue {
            let timestamp = job.timestamp;
            let event = match self.process(job) {
                Ok(timings) => {
                    *self.shared.timings.lock() = Some(timings);
                    self.shared.counters.record_completed();
                    RenderEvent::ResultsReady { timestamp }
                }
                Err(err) => {
                    tracing::warn!("Segmentation of frame {} failed: {:#}", timestamp, err);
                    self.shared.counters.record_failed();
                    RenderEvent::Failed { timestamp }
                }
            };

            self.shared.computing.store(false, Ordering::Release);
            if let Err(mpsc::SendError(event)) = self.events.send(event) {
                tracing::trace!("Renderer hung up, {:?} not delivered", event);
            }
        }
        tracing::debug!("Segmentation worker exiting");
    }

    fn process(&mut self, job: Job) -> Result<FrameTimings> {
        tracing::debug!("Running segmentation on image {}", job.timestamp);

        let result = self.segmentor.segment(&job.input)?;
        self.tracker.track_results(&result, job.timestamp)?;

        Ok(FrameTimings {
            timestamp: job.timestamp,
            native: result.native_time(),
            inference: result.inference_time(),
            processing: job.admitted_at.elapsed(),
            labels: self.tracker.last_labels(),
        })
    }
}
