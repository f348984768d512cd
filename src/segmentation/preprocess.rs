use anyhow::{bail, Result};
use image::{imageops, RgbImage};

/// Sensor rotation relative to the display, in clockwise quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalise any multiple of 90 degrees, including negative values
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            _ => bail!("Rotation must be a multiple of 90 degrees, got {}", degrees),
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// (cos, sin) of the clockwise angle in y-down image coordinates
    fn cos_sin(self) -> (f32, f32) {
        match self {
            Self::Deg0 => (1.0, 0.0),
            Self::Deg90 => (0.0, 1.0),
            Self::Deg180 => (-1.0, 0.0),
            Self::Deg270 => (0.0, -1.0),
        }
    }
}

/// 2-D affine map: `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Affine {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self { tx, ty, ..Self::IDENTITY }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(rotation: Rotation) -> Self {
        let (cos, sin) = rotation.cos_sin();
        Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Apply `self` first, then `next`
    pub fn then(self, next: Self) -> Self {
        Self {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }
}

/// Converts preview-size camera frames into model-input rasters
///
/// The frame is rotated by the sensor rotation, then scaled to the model
/// input. With `maintain_aspect` the frame is scaled to cover the input and
/// centre-cropped; otherwise each axis is stretched independently.
pub struct Preprocessor {
    frame_width: u32,
    frame_height: u32,
    target_width: u32,
    target_height: u32,
    rotation: Rotation,
    maintain_aspect: bool,
    crop_to_frame: Affine,
}

impl Preprocessor {
    pub fn new(
        (frame_width, frame_height): (u32, u32),
        (target_width, target_height): (u32, u32),
        rotation: Rotation,
        maintain_aspect: bool,
    ) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 || target_width == 0 || target_height == 0 {
            bail!(
                "Invalid preprocessing geometry {}x{} -> {}x{}",
                frame_width,
                frame_height,
                target_width,
                target_height
            );
        }

        let frame_to_crop = transformation(
            (frame_width, frame_height),
            (target_width, target_height),
            rotation,
            maintain_aspect,
        );
        let Some(crop_to_frame) = frame_to_crop.invert() else {
            bail!("Frame-to-crop transform is not invertible");
        };

        Ok(Self {
            frame_width,
            frame_height,
            target_width,
            target_height,
            rotation,
            maintain_aspect,
            crop_to_frame,
        })
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Maps model-input coordinates back into preview frame coordinates
    ///
    /// This is where an overlay raster in model space lands on the
    /// unrotated camera frame, including any centre-crop offset.
    pub fn crop_to_frame(&self) -> &Affine {
        &self.crop_to_frame
    }

    /// Produce the model-input raster for a preview frame
    ///
    /// # Arguments
    /// * `frame` - Camera frame at the preview size, in sensor orientation
    ///
    /// # Returns
    /// * RGB raster at the model input size
    ///
    /// Steps:
    /// 1. Rotate upright by the sensor rotation
    /// 2. Stretch to the target, or scale to cover it and centre-crop
    pub fn preprocess(&self, frame: &RgbImage) -> Result<RgbImage> {
        let _span = tracing::debug_span!("preprocess").entered();

        if frame.dimensions() != (self.frame_width, self.frame_height) {
            bail!(
                "Frame is {}x{}, preprocessor expects {}x{}",
                frame.width(),
                frame.height(),
                self.frame_width,
                self.frame_height
            );
        }

        let rotated = match self.rotation {
            Rotation::Deg0 => None,
            Rotation::Deg90 => Some(imageops::rotate90(frame)),
            Rotation::Deg180 => Some(imageops::rotate180(frame)),
            Rotation::Deg270 => Some(imageops::rotate270(frame)),
        };
        let upright = rotated.as_ref().unwrap_or(frame);

        if upright.dimensions() == (self.target_width, self.target_height) {
            return Ok(upright.clone());
        }

        if !self.maintain_aspect {
            return Ok(imageops::resize(
                upright,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            ));
        }

        let (width, height) = upright.dimensions();
        let scale = (self.target_width as f32 / width as f32)
            .max(self.target_height as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).max(self.target_width);
        let scaled_height = ((height as f32 * scale).round() as u32).max(self.target_height);

        let scaled = imageops::resize(
            upright,
            scaled_width,
            scaled_height,
            imageops::FilterType::Triangle,
        );
        let x = (scaled_width - self.target_width) / 2;
        let y = (scaled_height - self.target_height) / 2;
        Ok(imageops::crop_imm(&scaled, x, y, self.target_width, self.target_height).to_image())
    }
}

fn transformation(
    (src_width, src_height): (u32, u32),
    (dst_width, dst_height): (u32, u32),
    rotation: Rotation,
    maintain_aspect: bool,
) -> Affine {
    let (in_width, in_height) = if rotation.swaps_axes() {
        (src_height, src_width)
    } else {
        (src_width, src_height)
    };

    let sx = dst_width as f32 / in_width as f32;
    let sy = dst_height as f32 / in_height as f32;
    let (sx, sy) = if maintain_aspect {
        let s = sx.max(sy);
        (s, s)
    } else {
        (sx, sy)
    };

    Affine::translation(-(src_width as f32) / 2.0, -(src_height as f32) / 2.0)
        .then(Affine::rotation(rotation))
        .then(Affine::scaling(sx, sy))
        .then(Affine::translation(dst_width as f32 / 2.0, dst_height as f32 / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn close(actual: (f32, f32), expected: (f32, f32)) -> bool {
        (actual.0 - expected.0).abs() < 1e-3 && (actual.1 - expected.1).abs() < 1e-3
    }

    fn frame_to_crop(pre: &Preprocessor) -> Affine {
        pre.crop_to_frame().invert().unwrap()
    }

    #[test]
    fn rotation_normalises_negative_degrees() {
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Deg90);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn stretch_maps_frame_corners_to_crop_corners() {
        let pre = Preprocessor::new((640, 480), (256, 256), Rotation::Deg0, false).unwrap();

        assert!(close(frame_to_crop(&pre).apply(0.0, 0.0), (0.0, 0.0)));
        assert!(close(frame_to_crop(&pre).apply(640.0, 480.0), (256.0, 256.0)));
        assert!(close(pre.crop_to_frame().apply(128.0, 128.0), (320.0, 240.0)));
    }

    #[test]
    fn quarter_turn_maps_top_left_to_top_right() {
        let pre = Preprocessor::new((640, 480), (256, 256), Rotation::Deg90, false).unwrap();

        assert!(close(frame_to_crop(&pre).apply(0.0, 0.0), (256.0, 0.0)));
        let back = pre.crop_to_frame().apply(256.0, 0.0);
        assert!(close(back, (0.0, 0.0)));
    }

    #[test]
    fn maintain_aspect_uses_uniform_scale() {
        let pre = Preprocessor::new((640, 480), (256, 256), Rotation::Deg0, true).unwrap();
        let (x0, y0) = frame_to_crop(&pre).apply(0.0, 0.0);
        let (x1, y1) = frame_to_crop(&pre).apply(640.0, 480.0);

        assert!(((x1 - x0) / 640.0 - (y1 - y0) / 480.0).abs() < 1e-4);
        assert!(close((y0, y1), (0.0, 256.0)));
    }

    #[test]
    fn preprocess_produces_model_geometry() {
        let pre = Preprocessor::new((64, 48), (16, 16), Rotation::Deg0, false).unwrap();
        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));

        let crop = pre.preprocess(&frame).unwrap();
        assert_eq!(crop.dimensions(), (16, 16));
        assert_eq!(crop.get_pixel(8, 8), &Rgb([10, 20, 30]));

        let aspect = Preprocessor::new((64, 48), (16, 16), Rotation::Deg0, true).unwrap();
        assert_eq!(aspect.preprocess(&frame).unwrap().dimensions(), (16, 16));
    }

    #[test]
    fn preprocess_rotates_before_scaling() {
        let pre = Preprocessor::new((4, 2), (2, 4), Rotation::Deg90, false).unwrap();
        let mut frame = RgbImage::new(4, 2);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));

        let crop = pre.preprocess(&frame).unwrap();
        assert_eq!(crop.dimensions(), (2, 4));
        assert_eq!(crop.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn preprocess_rejects_wrong_frame_size() {
        let pre = Preprocessor::new((64, 48), (16, 16), Rotation::Deg0, false).unwrap();
        assert!(pre.preprocess(&RgbImage::new(32, 32)).is_err());
    }
}
