use super::FrameSink;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Writes composited preview frames to a v4l2loopback device as YUYV
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let format = Output::set_format(&device, &requested)
            .context("Failed to set YUYV output format")?;
        if (format.width, format.height) != (width, height) {
            tracing::warn!(
                "Loopback device accepted {}x{} instead of {}x{}, frames will be scaled",
                format.width,
                format.height,
                width,
                height
            );
        }
        let (width, height) = (format.width, format.height);

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            yuyv: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Pack an RGB frame into YUYV 4:2:2, averaging chroma over each pixel pair
fn pack_yuyv(frame: &RgbImage, out: &mut Vec<u8>) {
    out.clear();
    let stride = frame.width() as usize * 3;
    if stride == 0 {
        return;
    }
    for row in frame.as_raw().chunks_exact(stride) {
        for pair in row.chunks(6) {
            let first = &pair[..3];
            let second = pair.get(3..6).unwrap_or(first);

            let (y0, u0, v0) = rgb_to_yuv(first);
            let (y1, u1, v1) = rgb_to_yuv(second);
            out.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }
}

/// BT.601 RGB to YUV
fn rgb_to_yuv(pixel: &[u8]) -> (u8, u8, u8) {
    let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);

    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.147 * r - 0.289 * g + 0.436 * b + 128.0;
    let v = 0.615 * r - 0.515 * g - 0.100 * b + 128.0;

    let clamp = |value: f32| value.clamp(0.0, 255.0) as u8;
    (clamp(y), clamp(u), clamp(v))
}

impl FrameSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = imageops::resize(
                frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        pack_yuyv(frame, &mut self.yuyv);

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn packs_two_bytes_per_pixel() {
        let frame = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let mut out = Vec::new();
        pack_yuyv(&frame, &mut out);

        assert_eq!(out.len(), 4 * 2 * 2);
        assert_eq!(&out[..4], &[0, 128, 0, 128]);
    }

    #[test]
    fn odd_width_repeats_last_pixel() {
        let frame = RgbImage::from_pixel(3, 1, Rgb([255, 255, 255]));
        let mut out = Vec::new();
        pack_yuyv(&frame, &mut out);

        assert_eq!(out.len(), 8);
        assert_eq!(out[4], out[6]);
    }

    #[test]
    fn chroma_is_shared_across_each_pair() {
        let mut frame = RgbImage::new(2, 2);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));
        frame.put_pixel(1, 0, Rgb([0, 0, 255]));
        let mut out = Vec::new();
        pack_yuyv(&frame, &mut out);

        let (y_red, u_red, v_red) = rgb_to_yuv(&[255, 0, 0]);
        let (y_blue, u_blue, v_blue) = rgb_to_yuv(&[0, 0, 255]);
        assert_eq!(out[0], y_red);
        assert_eq!(out[2], y_blue);
        assert_eq!(out[1], ((u_red as u16 + u_blue as u16) / 2) as u8);
        assert_eq!(out[3], ((v_red as u16 + v_blue as u16) / 2) as u8);
        // Second row is black
        assert_eq!(&out[4..], &[0, 128, 0, 128]);
    }

    #[test]
    fn frames_are_scaled_to_the_negotiated_size() {
        // Device settled on 4x2 although a larger preview was requested
        let mut output = V4L2Output {
            file: tempfile::tempfile().unwrap(),
            width: 4,
            height: 2,
            yuyv: Vec::new(),
        };
        output
            .write_frame(&RgbImage::from_pixel(8, 6, Rgb([0, 0, 0])))
            .unwrap();

        assert_eq!(output.resolution(), (4, 2));
        assert_eq!(output.file.metadata().unwrap().len(), 4 * 2 * 2);
    }

    #[test]
    fn white_is_full_luma_neutral_chroma() {
        let (y, u, v) = rgb_to_yuv(&[255, 255, 255]);
        assert!(y >= 254);
        assert!((127..=129).contains(&u));
        assert!((127..=129).contains(&v));
    }
}
