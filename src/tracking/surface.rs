use crate::segmentation::Affine;
use image::{RgbImage, RgbaImage};

/// Drawing target handed to render callbacks
pub trait RenderSurface {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Alpha-blend `raster` onto the surface
    ///
    /// `transform` maps raster coordinates to surface coordinates.
    fn draw_raster(&mut self, raster: &RgbaImage, transform: &Affine);

    /// Draw a block of text whose bottom-left corner is at (x, y)
    fn draw_text_lines(&mut self, x: u32, y: u32, lines: &[String]);
}

/// Software surface over an RGB video frame
///
/// Rasters are blended into the pixels. Text has no glyph renderer here, so
/// the most recent block is kept for the output stage to report.
pub struct FrameCanvas {
    image: RgbImage,
    text: Vec<String>,
}

impl FrameCanvas {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            text: Vec::new(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn text_lines(&self) -> &[String] {
        &self.text
    }
}

impl RenderSurface for FrameCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn draw_raster(&mut self, raster: &RgbaImage, transform: &Affine) {
        let (raster_w, raster_h) = raster.dimensions();
        if raster_w == 0 || raster_h == 0 {
            return;
        }
        let Some(inverse) = transform.invert() else {
            return;
        };

        // Surface pixels covered by the transformed raster bounds
        let corners = [
            transform.apply(0.0, 0.0),
            transform.apply(raster_w as f32, 0.0),
            transform.apply(0.0, raster_h as f32),
            transform.apply(raster_w as f32, raster_h as f32),
        ];
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let clip = |lo: f32, hi: f32, limit: u32| {
            lo.floor().max(0.0) as u32..(hi.ceil().max(0.0) as u32).min(limit)
        };
        let x_range = clip(min_x, max_x, self.image.width());
        let y_range = clip(min_y, max_y, self.image.height());

        for ty in y_range {
            for tx in x_range.clone() {
                // Nearest raster pixel under the surface pixel centre
                let (sx, sy) = inverse.apply(tx as f32 + 0.5, ty as f32 + 0.5);
                let (sx, sy) = (sx.floor(), sy.floor());
                if sx < 0.0 || sy < 0.0 || sx >= raster_w as f32 || sy >= raster_h as f32 {
                    continue;
                }

                let src = raster.get_pixel(sx as u32, sy as u32);
                let alpha = src[3] as u32;
                let dst = self.image.get_pixel_mut(tx, ty);
                for channel in 0..3 {
                    let blended =
                        (src[channel] as u32 * alpha + dst[channel] as u32 * (255 - alpha) + 127) / 255;
                    dst[channel] = blended as u8;
                }
            }
        }
    }

    fn draw_text_lines(&mut self, _x: u32, _y: u32, lines: &[String]) {
        self.text = lines.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::Rotation;
    use image::{Rgb, Rgba};

    #[test]
    fn opaque_raster_scales_onto_frame() {
        let mut raster = RgbaImage::new(2, 2);
        raster.put_pixel(1, 1, Rgba([255, 0, 0, 255]));

        let mut canvas = FrameCanvas::new(RgbImage::from_pixel(4, 4, Rgb([0, 0, 255])));
        canvas.draw_raster(&raster, &Affine::scaling(2.0, 2.0));

        let image = canvas.image();
        assert_eq!(image.get_pixel(3, 3), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(2, 2), &Rgb([255, 0, 0]));
        // Transparent raster pixels leave the frame untouched
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 255]));
    }

    #[test]
    fn translucent_raster_blends() {
        let raster = RgbaImage::from_pixel(1, 1, Rgba([200, 0, 0, 100]));
        let mut canvas = FrameCanvas::new(RgbImage::from_pixel(1, 1, Rgb([0, 100, 0])));
        canvas.draw_raster(&raster, &Affine::IDENTITY);

        assert_eq!(canvas.image().get_pixel(0, 0), &Rgb([78, 61, 0]));
    }

    #[test]
    fn raster_larger_than_surface_is_clipped() {
        let raster = RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]));
        let mut canvas = FrameCanvas::new(RgbImage::new(4, 2));
        canvas.draw_raster(&raster, &Affine::scaling(1.0, 3.0));

        assert!(canvas.image().pixels().all(|p| *p == Rgb([0, 255, 0])));
    }

    #[test]
    fn offset_raster_leaves_uncovered_pixels() {
        let raster = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let mut canvas = FrameCanvas::new(RgbImage::new(6, 2));
        canvas.draw_raster(&raster, &Affine::translation(2.0, 0.0));

        let image = canvas.image();
        assert_eq!(image.get_pixel(1, 0), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(2, 0), &Rgb([255, 255, 255]));
        assert_eq!(image.get_pixel(3, 1), &Rgb([255, 255, 255]));
        assert_eq!(image.get_pixel(4, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn quarter_turn_rotates_raster() {
        // A 2x1 raster, red then green, turned clockwise into a 1x2 column
        let mut raster = RgbaImage::new(2, 1);
        raster.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        raster.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        let transform = Affine::rotation(Rotation::Deg90).then(Affine::translation(1.0, 0.0));

        let mut canvas = FrameCanvas::new(RgbImage::new(1, 2));
        canvas.draw_raster(&raster, &transform);

        assert_eq!(canvas.image().get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(canvas.image().get_pixel(0, 1), &Rgb([0, 255, 0]));
    }

    #[test]
    fn text_block_replaces_previous() {
        let mut canvas = FrameCanvas::new(RgbImage::new(1, 1));
        canvas.draw_text_lines(0, 0, &["a".to_string()]);
        canvas.draw_text_lines(0, 0, &["b".to_string(), "c".to_string()]);
        assert_eq!(canvas.text_lines(), ["b", "c"]);
    }
}
