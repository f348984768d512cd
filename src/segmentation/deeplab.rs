use super::error::LoadError;
use super::types::{SegmentationResult, Segmentor};
use anyhow::{bail, ensure, Context, Result};
use image::RgbImage;
use ndarray::{s, ArrayView4, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::TensorRef;
use std::path::Path;
use std::time::Instant;

/// How the model wants its RGB input laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputEncoding {
    /// Quantized models: raw RGB bytes, NHWC `[1, H, W, 3]`
    Uint8Nhwc,
    /// Float models: RGB scaled to [-1, 1], NCHW `[1, 3, H, W]`
    Float32Nchw,
}

/// DeepLab-style semantic segmentation model served through ONNX Runtime
///
/// Input and output buffers are allocated once and reused for every frame.
pub struct DeepLabSegmentor {
    session: Session,
    labels: Vec<String>,
    width: u32,
    height: u32,
    encoding: InputEncoding,

    // Pre-allocated buffers
    input_bytes: Vec<u8>,
    input_floats: Vec<f32>,
    pixel_classes: Vec<u32>,
}

impl DeepLabSegmentor {
    /// Load a segmentation model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `labels` - Label table, one entry per output class
    /// * `width`, `height` - Model input size
    /// * `intra_threads` - Intra-op thread count for ONNX Runtime
    ///
    /// The input encoding follows the first input's element type: uint8
    /// models get raw RGB NHWC, anything else float NCHW in [-1, 1].
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        width: u32,
        height: u32,
        intra_threads: usize,
    ) -> Result<Self, LoadError> {
        let path = model_path.as_ref();
        tracing::info!("Loading DeepLab model from {}", path.display());

        let model_err = |source: ort::Error| LoadError::Model {
            path: path.to_path_buf(),
            source,
        };
        let session = Session::builder()
            .map_err(model_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_err)?
            .with_intra_threads(intra_threads)
            .map_err(model_err)?
            .commit_from_file(path)
            .map_err(model_err)?;

        let encoding = match session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_type())
        {
            Some(TensorElementType::Uint8) => InputEncoding::Uint8Nhwc,
            _ => InputEncoding::Float32Nchw,
        };

        tracing::info!(
            "DeepLab model loaded: {}x{} input, {} classes, {:?}",
            width,
            height,
            labels.len(),
            encoding
        );

        let pixels = (width * height) as usize;
        Ok(Self {
            session,
            labels,
            width,
            height,
            encoding,
            input_bytes: vec![0; pixels * 3],
            input_floats: vec![0.0; pixels * 3],
            pixel_classes: vec![0; pixels],
        })
    }
}

impl Segmentor for DeepLabSegmentor {
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationResult> {
        let _span = tracing::debug_span!("deeplab_segment").entered();
        let start = Instant::now();

        ensure!(
            frame.dimensions() == (self.width, self.height),
            "Model input must be {}x{}, got {}x{}",
            self.width,
            self.height,
            frame.width(),
            frame.height()
        );

        match self.encoding {
            InputEncoding::Uint8Nhwc => encode_u8_nhwc(frame, &mut self.input_bytes),
            InputEncoding::Float32Nchw => encode_f32_nchw(frame, &mut self.input_floats),
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let native_start = Instant::now();
        let outputs = match self.encoding {
            InputEncoding::Uint8Nhwc => {
                let input =
                    TensorRef::from_array_view(([1usize, h, w, 3], self.input_bytes.as_slice()))?;
                self.session.run(ort::inputs![input])
            }
            InputEncoding::Float32Nchw => {
                let input =
                    TensorRef::from_array_view(([1usize, 3, h, w], self.input_floats.as_slice()))?;
                self.session.run(ort::inputs![input])
            }
        }
        .context("Failed to run inference")?;
        let native_time = native_start.elapsed();

        let output = &outputs[0];
        let num_classes = self.labels.len();
        if let Ok((shape, data)) = output.try_extract_tensor::<i64>() {
            decode_indices(shape, data.iter().copied(), &mut self.pixel_classes)?;
        } else if let Ok((shape, data)) = output.try_extract_tensor::<i32>() {
            decode_indices(shape, data.iter().map(|&v| v as i64), &mut self.pixel_classes)?;
        } else {
            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .context("Model output is neither class indices nor float logits")?;
            decode_logits(shape, data, (w, h), num_classes, &mut self.pixel_classes)?;
        }
        drop(outputs);

        Ok(SegmentationResult::new(
            self.pixel_classes.clone(),
            self.width,
            self.height,
            num_classes,
            start.elapsed(),
            native_time,
        ))
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Raw interleaved RGB bytes, as `[1, H, W, 3]`
fn encode_u8_nhwc(frame: &RgbImage, out: &mut [u8]) {
    out.copy_from_slice(frame.as_raw());
}

/// RGB scaled to [-1, 1] in planar `[1, 3, H, W]` order
fn encode_f32_nchw(frame: &RgbImage, out: &mut [f32]) {
    let plane = (frame.width() * frame.height()) as usize;
    for (i, pixel) in frame.pixels().enumerate() {
        for channel in 0..3 {
            out[channel * plane + i] = pixel[channel] as f32 / 127.5 - 1.0;
        }
    }
}

/// Copy integer class predictions, any shape with `H*W` elements
fn decode_indices(
    shape: &[i64],
    values: impl Iterator<Item = i64>,
    out: &mut [u32],
) -> Result<()> {
    let elements: i64 = shape.iter().product();
    ensure!(
        elements as usize == out.len(),
        "Class output shape {:?} does not hold {} pixels",
        shape,
        out.len()
    );

    for (slot, value) in out.iter_mut().zip(values) {
        *slot = u32::try_from(value).with_context(|| format!("Invalid class index {}", value))?;
    }
    Ok(())
}

/// Per-pixel argmax over NCHW `[1, C, H, W]` or NHWC `[1, H, W, C]` logits
fn decode_logits(
    shape: &[i64],
    data: &[f32],
    (width, height): (usize, usize),
    num_classes: usize,
    out: &mut [u32],
) -> Result<()> {
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    let (channels_first, view) = match dims.as_slice() {
        [1, c, h, w] if *c == num_classes && *h == height && *w == width => {
            (true, ArrayView4::from_shape((1, *c, *h, *w), data)?)
        }
        [1, h, w, c] if *c == num_classes && *h == height && *w == width => {
            (false, ArrayView4::from_shape((1, *h, *w, *c), data)?)
        }
        _ => bail!(
            "Logit shape {:?} does not match {}x{} with {} classes",
            shape,
            width,
            height,
            num_classes
        ),
    };

    let view = view.index_axis_move(Axis(0), 0);
    for (y, row) in out.chunks_mut(width).enumerate() {
        for (x, slot) in row.iter_mut().enumerate() {
            let scores = if channels_first {
                view.slice(s![.., y, x])
            } else {
                view.slice(s![y, x, ..])
            };
            let mut best = 0;
            for (class, &score) in scores.iter().enumerate() {
                if score > scores[best] {
                    best = class;
                }
            }
            *slot = best as u32;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn two_pixel_frame() -> RgbImage {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([255, 0, 51]));
        frame.put_pixel(1, 0, Rgb([0, 102, 255]));
        frame
    }

    #[test]
    fn uint8_input_keeps_interleaved_rgb() {
        let mut out = vec![0u8; 6];
        encode_u8_nhwc(&two_pixel_frame(), &mut out);
        assert_eq!(out, vec![255, 0, 51, 0, 102, 255]);
    }

    #[test]
    fn float_input_is_planar_and_centred() {
        let mut out = vec![0f32; 6];
        encode_f32_nchw(&two_pixel_frame(), &mut out);

        // R plane, then G, then B
        let expected = [1.0, -1.0, -1.0, -0.2, -0.6, 1.0];
        for (actual, expected) in out.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-6, "{:?}", out);
        }
    }

    #[test]
    fn indices_accept_any_shape_with_matching_pixel_count() {
        let mut out = vec![0u32; 4];
        decode_indices(&[1, 2, 2], [0i64, 1, 2, 1].into_iter(), &mut out).unwrap();
        assert_eq!(out, vec![0, 1, 2, 1]);

        decode_indices(&[1, 4], [2i64, 2, 0, 0].into_iter(), &mut out).unwrap();
        assert_eq!(out, vec![2, 2, 0, 0]);

        assert!(decode_indices(&[1, 3], [0i64; 3].into_iter(), &mut out).is_err());
        assert!(decode_indices(&[4], [0i64, -1, 0, 0].into_iter(), &mut out).is_err());
    }

    #[test]
    fn nchw_logits_take_per_pixel_argmax() {
        // 2 classes over a 2x1 image: pixel 0 prefers class 1, pixel 1 class 0
        let data = [0.1, 0.9, 0.8, 0.2];
        let mut out = vec![0u32; 2];
        decode_logits(&[1, 2, 1, 2], &data, (2, 1), 2, &mut out).unwrap();
        assert_eq!(out, vec![1, 0]);
    }

    #[test]
    fn nhwc_logits_take_per_pixel_argmax() {
        // 3 classes over a 1x2 image
        let data = [0.0, 0.1, 5.0, 3.0, 0.0, 0.0];
        let mut out = vec![0u32; 2];
        decode_logits(&[1, 2, 1, 3], &data, (1, 2), 3, &mut out).unwrap();
        assert_eq!(out, vec![2, 0]);
    }

    #[test]
    fn logits_with_wrong_class_count_are_rejected() {
        let mut out = vec![0u32; 2];
        assert!(decode_logits(&[1, 4, 1, 2], &[0.0; 8], (2, 1), 2, &mut out).is_err());
    }
}
