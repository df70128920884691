//! Frame decoding and tensor preparation.

use candle_core::{Device, Tensor};
use image::{DynamicImage, RgbImage};
use tracing::trace;

use crate::error::{DecodeError, InferenceError};

/// Square input resolution the DFDC classifiers were trained at.
pub const DEFAULT_INPUT_SIZE: u32 = 380;

/// Turns encoded frames into `(1, 3, S, S)` tensors in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    input_size: u32,
    device: Device,
}

impl Preprocessor {
    /// Creates a preprocessor producing `input_size` x `input_size` tensors on `device`.
    #[must_use]
    pub const fn new(input_size: u32, device: Device) -> Self {
        Self { input_size, device }
    }

    /// Side length of produced tensors.
    #[must_use]
    pub const fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Device produced tensors live on.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Decodes image bytes, sniffing the container format.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not a supported image.
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Converts a decoded frame into the classifier input tensor.
    ///
    /// The frame is converted to RGB (alpha dropped, grayscale expanded) and
    /// stretched to `S x S` with [`resize_bilinear`], without cropping.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError`] if the tensor cannot be built on the device.
    pub fn to_tensor(&self, image: &DynamicImage) -> Result<Tensor, InferenceError> {
        let size = self.input_size;
        let rgb = image.to_rgb8();
        let resized = if rgb.dimensions() == (size, size) {
            rgb
        } else {
            resize_bilinear(&rgb, size, size)
        };
        trace!(
            from_width = image.width(),
            from_height = image.height(),
            size,
            "Resized frame"
        );

        let data: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();
        let side = size as usize;

        let tensor = Tensor::from_vec(data, (1, side, side, 3), &Device::Cpu)?
            .permute((0, 3, 1, 2))?
            .contiguous()?
            .to_device(&self.device)?;
        Ok(tensor)
    }
}

/// One output coordinate's source samples: `(lower, upper, weight of upper)`.
type Taps = (usize, usize, f32);

/// Source taps for each of `dst` output positions along an axis of `src`.
///
/// Output `d` samples source position `(d + 0.5) * src / dst - 0.5` and blends
/// only the two neighbouring pixels. Positions past either edge clamp to the
/// edge pixel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn linear_taps(src: u32, dst: u32) -> Vec<Taps> {
    let scale = f64::from(src) / f64::from(dst);
    let last = src.saturating_sub(1) as usize;
    (0..dst)
        .map(|d| {
            let pos = ((f64::from(d) + 0.5) * scale - 0.5) as f32;
            let floor = pos.floor();
            if floor < 0.0 {
                (0, 0, 0.0)
            } else if floor as usize >= last {
                (last, last, 0.0)
            } else {
                let lower = floor as usize;
                (lower, lower + 1, pos - floor)
            }
        })
        .collect()
}

/// Bilinear resize matching OpenCV's `INTER_LINEAR`.
///
/// Unlike `image`'s triangle filter this never widens the kernel when
/// shrinking, so fine detail aliases the same way it did in training.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resize_bilinear(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    const CHANNELS: usize = 3;
    if src.width() == 0 || src.height() == 0 || width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }

    let xs = linear_taps(src.width(), width);
    let ys = linear_taps(src.height(), height);
    let src_row = src.width() as usize * CHANNELS;
    let dst_row = width as usize * CHANNELS;
    let raw = src.as_raw();

    // Horizontal pass over every source row.
    let mut rows = vec![0f32; src.height() as usize * dst_row];
    for (y, out) in rows.chunks_exact_mut(dst_row).enumerate() {
        let line = &raw[y * src_row..(y + 1) * src_row];
        for (x, &(lo, hi, w)) in xs.iter().enumerate() {
            for c in 0..CHANNELS {
                let a = f32::from(line[lo * CHANNELS + c]);
                let b = f32::from(line[hi * CHANNELS + c]);
                out[x * CHANNELS + c] = a + (b - a) * w;
            }
        }
    }

    let mut data = Vec::with_capacity(height as usize * dst_row);
    for &(lo, hi, w) in &ys {
        let top = &rows[lo * dst_row..(lo + 1) * dst_row];
        let bottom = &rows[hi * dst_row..(hi + 1) * dst_row];
        data.extend(top.iter().zip(bottom).map(|(&a, &b)| {
            (a + (b - a) * w).round().clamp(0.0, 255.0) as u8
        }));
    }

    RgbImage::from_raw(width, height, data).unwrap_or_else(|| RgbImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn preprocessor(size: u32) -> Preprocessor {
        Preprocessor::new(size, Device::Cpu)
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_tensor_shape_and_range() {
        let img = DynamicImage::new_rgb8(400, 300);
        let tensor = preprocessor(16).to_tensor(&img).expect("tensor");
        assert_eq!(tensor.dims(), &[1, 3, 16, 16]);

        let values = tensor.flatten_all().expect("flat").to_vec1::<f32>().expect("vec");
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_white_frame_is_all_ones() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            20,
            10,
            image::Rgb([255, 255, 255]),
        ));
        let tensor = preprocessor(8).to_tensor(&img).expect("tensor");
        let values = tensor.flatten_all().expect("flat").to_vec1::<f32>().expect("vec");
        assert!(values.iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_grayscale_is_expanded() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([51])));
        let tensor = preprocessor(8).to_tensor(&img).expect("tensor");
        assert_eq!(tensor.dims(), &[1, 3, 8, 8]);
        let values = tensor.flatten_all().expect("flat").to_vec1::<f32>().expect("vec");
        assert!(values.iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_alpha_is_dropped() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 0])));
        let tensor = preprocessor(8).to_tensor(&img).expect("tensor");
        assert_eq!(tensor.dims()[1], 3);

        // Channel-first: the red plane comes first and is saturated.
        let red = tensor.get(0).and_then(|t| t.get(0)).expect("plane");
        let red = red.flatten_all().expect("flat").to_vec1::<f32>().expect("vec");
        assert!(red.iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));
    }

    fn row_values(image: &RgbImage) -> Vec<u8> {
        image.pixels().map(|p| p[0]).collect()
    }

    #[test]
    fn test_downscale_samples_between_pixels() {
        // White every 4th column: a 4x shrink samples x = 4i + 1.5, which
        // lies between two black columns.
        let src = RgbImage::from_fn(80, 8, |x, _| {
            if x % 4 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        });
        let resized = resize_bilinear(&src, 20, 2);
        assert_eq!(resized.dimensions(), (20, 2));
        assert!(resized.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_downscale_by_two_averages_pairs() {
        let src = RgbImage::from_fn(4, 1, |x, _| {
            let v = [0, 255, 100, 200][x as usize];
            image::Rgb([v, v, v])
        });
        let resized = resize_bilinear(&src, 2, 1);
        assert_eq!(row_values(&resized), vec![128, 150]);
    }

    #[test]
    fn test_upscale_clamps_at_edges() {
        let src = RgbImage::from_fn(2, 1, |x, _| {
            let v = if x == 0 { 0 } else { 255 };
            image::Rgb([v, v, v])
        });
        let resized = resize_bilinear(&src, 4, 1);
        // Sample positions -0.25, 0.25, 0.75 and 1.25.
        assert_eq!(row_values(&resized), vec![0, 64, 191, 255]);
    }

    #[test]
    fn test_same_size_is_identity() {
        let src = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8 * 40, y as u8 * 80, 7]));
        assert_eq!(resize_bilinear(&src, 5, 3), src);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Preprocessor::decode(b"GIF89a but not really").is_err());
        assert!(Preprocessor::decode(&[]).is_err());
    }
}
