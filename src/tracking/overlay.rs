use super::palette::Palette;
use super::surface::RenderSurface;
use crate::segmentation::{Affine, SegmentationResult};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;

/// A segmentation result that does not fit the tracker's established geometry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("result is {}x{} but the overlay raster is {}x{}", found.0, found.1, expected.0, expected.1)]
    DimensionMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("result declares {found} classes but the tracker has {expected}")]
    ClassCountMismatch { expected: usize, found: usize },

    #[error("result holds {found} class values for {expected} pixels")]
    BufferLength { expected: usize, found: usize },

    #[error("class index {class} at ({x}, {y}) is outside 0..{num_classes}")]
    ClassOutOfRange {
        class: u32,
        x: u32,
        y: u32,
        num_classes: usize,
    },
}

/// State readers see; replaced wholesale once a remap has finished
#[derive(Default)]
struct Published {
    raster: Option<Arc<RgbaImage>>,
    labels: Vec<String>,
    timestamp: Option<u64>,
}

/// Writer-side state, held for the whole of `track_results`
#[derive(Default)]
struct Workspace {
    geometry: Option<(u32, u32)>,
    scratch: Option<RgbaImage>,
}

/// Turns segmentation results into a colour-coded overlay and the list of
/// classes present in the frame.
///
/// `track_results` renders into a private scratch raster and only then swaps
/// it in under a short write lock, so `draw` never waits on a remap and
/// never sees a partially written raster. The class buffer is read
/// row-major (`y * width + x`) and written to raster pixel (x, y).
pub struct OverlayTracker {
    preview_size: (u32, u32),
    placement: Option<Affine>,
    palette: Palette,
    labels: Vec<String>,
    workspace: Mutex<Workspace>,
    published: RwLock<Published>,
}

impl OverlayTracker {
    pub fn new(preview_size: (u32, u32), labels: Vec<String>) -> Self {
        let palette = Palette::new(labels.len());
        Self::with_palette(preview_size, labels, palette)
    }

    pub fn with_palette(preview_size: (u32, u32), labels: Vec<String>, palette: Palette) -> Self {
        Self {
            preview_size,
            placement: None,
            palette,
            labels,
            workspace: Mutex::new(Workspace::default()),
            published: RwLock::new(Published::default()),
        }
    }

    /// Fix the raster geometry up front instead of taking it from the first result
    pub fn with_raster_size(self, width: u32, height: u32) -> Self {
        self.workspace.lock().geometry = Some((width, height));
        self
    }

    /// Place the raster on the preview through `crop_to_frame` instead of
    /// the aspect-corrected scale
    ///
    /// # Arguments
    /// * `crop_to_frame` - Maps raster (model-input) coordinates to preview
    ///   frame coordinates, rotation and centre-crop offset included
    pub fn with_placement(mut self, crop_to_frame: Affine) -> Self {
        self.placement = Some(crop_to_frame);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Remap a result into the overlay and rebuild the present-label list
    ///
    /// # Arguments
    /// * `result` - Must match the tracker's class count and raster geometry
    /// * `timestamp` - Sequence number of the frame the result came from
    ///
    /// Steps:
    /// 1. Validate the whole result before touching any pixel
    /// 2. Colour each pixel into the scratch raster, marking visited classes
    /// 3. Swap the raster and label list in under a short write lock
    ///
    /// On error nothing readers can observe is changed.
    pub fn track_results(
        &self,
        result: &SegmentationResult,
        timestamp: u64,
    ) -> Result<(), TrackError> {
        tracing::debug!("Processing from {}", timestamp);
        let _span = tracing::debug_span!("track_results", timestamp).entered();

        let mut workspace = self.workspace.lock();
        self.validate(result, workspace.geometry)?;

        let (width, height) = (result.width(), result.height());
        let mut raster = workspace
            .scratch
            .take()
            .filter(|raster| raster.dimensions() == (width, height))
            .unwrap_or_else(|| RgbaImage::new(width, height));

        let colors = self.palette.colors();
        let mut visited = vec![false; self.labels.len()];
        for (pixel, &class) in raster.pixels_mut().zip(result.pixel_classes()) {
            *pixel = colors[class as usize];
            visited[class as usize] = true;
        }

        let labels: Vec<String> = visited
            .iter()
            .zip(&self.labels)
            .filter(|(seen, _)| **seen)
            .map(|(_, label)| label.clone())
            .collect();

        workspace.geometry = Some((width, height));
        let previous = {
            let mut published = self.published.write();
            published.labels = labels;
            published.timestamp = Some(timestamp);
            published.raster.replace(Arc::new(raster))
        };

        // Recycle the old raster unless a reader still holds it
        workspace.scratch = previous.and_then(|old| Arc::try_unwrap(old).ok());
        Ok(())
    }

    fn validate(
        &self,
        result: &SegmentationResult,
        geometry: Option<(u32, u32)>,
    ) -> Result<(), TrackError> {
        let num_classes = self.labels.len();
        if result.num_classes() != num_classes || self.palette.len() < num_classes {
            return Err(TrackError::ClassCountMismatch {
                expected: num_classes,
                found: result.num_classes(),
            });
        }

        let found = (result.width(), result.height());
        if let Some(expected) = geometry {
            if expected != found {
                return Err(TrackError::DimensionMismatch { expected, found });
            }
        }

        let classes = result.pixel_classes();
        let pixels = found.0 as usize * found.1 as usize;
        if pixels == 0 || classes.len() != pixels {
            return Err(TrackError::BufferLength {
                expected: pixels,
                found: classes.len(),
            });
        }

        if let Some(offset) = classes.iter().position(|&c| c as usize >= num_classes) {
            return Err(TrackError::ClassOutOfRange {
                class: classes[offset],
                x: (offset % found.0 as usize) as u32,
                y: (offset / found.0 as usize) as u32,
                num_classes,
            });
        }
        Ok(())
    }

    /// Blit the latest overlay onto `surface`; does nothing before the first result
    ///
    /// With a placement the raster goes through it into preview coordinates,
    /// which are then stretched onto the surface. Without one the raster is
    /// scaled to the surface width, with the vertical factor stretched by the
    /// preview aspect ratio so square model-space output lands on the
    /// camera's native aspect.
    pub fn draw<S: RenderSurface + ?Sized>(&self, surface: &mut S) {
        let Some(raster) = self.raster() else {
            return;
        };

        let (preview_w, preview_h) = self.preview_size;
        let (surface_w, surface_h) = (surface.width() as f32, surface.height() as f32);
        let transform = match self.placement {
            Some(crop_to_frame) => crop_to_frame.then(Affine::scaling(
                surface_w / preview_w as f32,
                surface_h / preview_h as f32,
            )),
            None => {
                let scale_x = surface_w / raster.width() as f32;
                let scale_y = scale_x * preview_w as f32 / preview_h as f32;
                Affine::scaling(scale_x, scale_y)
            }
        };
        surface.draw_raster(&raster, &transform);
    }

    /// Labels of the classes present in the most recent result, ascending by class index
    pub fn last_labels(&self) -> Vec<String> {
        self.published.read().labels.clone()
    }

    /// Snapshot of the most recently published overlay
    pub fn raster(&self) -> Option<Arc<RgbaImage>> {
        self.published.read().raster.clone()
    }

    /// Timestamp of the most recently tracked result
    pub fn last_timestamp(&self) -> Option<u64> {
        self.published.read().timestamp
    }
}
