//! Synthetic frame builders for testing.

use std::io::Cursor;

use dfscan_core::domain::FrameInfo;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

/// Builder for creating synthetic test frames.
///
/// Frames come either decoded (`FrameInfo`, for the core pipeline) or encoded
/// (`Vec<u8>`, for uploads and files on disk).
pub struct SyntheticFrameBuilder;

impl SyntheticFrameBuilder {
    // === Decoded frames ===

    /// Creates a uniform RGB frame.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> FrameInfo {
        let img = RgbImage::from_pixel(width, height, Rgb(rgb));
        FrameInfo::new("synthetic://solid", DynamicImage::ImageRgb8(img))
    }

    /// Creates an all-black RGB frame.
    #[must_use]
    pub fn black(width: u32, height: u32) -> FrameInfo {
        Self::solid(width, height, [0, 0, 0])
    }

    /// Creates a uniform single-channel frame.
    #[must_use]
    pub fn gray(width: u32, height: u32, value: u8) -> FrameInfo {
        let img = GrayImage::from_pixel(width, height, Luma([value]));
        FrameInfo::new("synthetic://gray", DynamicImage::ImageLuma8(img))
    }

    /// Creates a uniform RGBA frame.
    #[must_use]
    pub fn rgba(width: u32, height: u32, rgba: [u8; 4]) -> FrameInfo {
        let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
        FrameInfo::new("synthetic://rgba", DynamicImage::ImageRgba8(img))
    }

    /// Creates a black and white checkerboard.
    #[must_use]
    pub fn checkerboard(width: u32, height: u32, cell_size: u32) -> FrameInfo {
        let cell = cell_size.max(1);
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        FrameInfo::new("synthetic://checkerboard", DynamicImage::ImageRgb8(img))
    }

    // === Encoded frames ===

    /// Encodes an image in the given container format.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory encoder fails, which only happens for formats
    /// the `image` crate was built without.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), format)
            .expect("in-memory encoding");
        buf
    }

    /// PNG bytes of a uniform RGB frame.
    #[must_use]
    pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        Self::encode(&Self::solid(width, height, rgb).image, ImageFormat::Png)
    }

    /// JPEG bytes of a uniform RGB frame.
    #[must_use]
    pub fn jpeg_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        Self::encode(&Self::solid(width, height, rgb).image, ImageFormat::Jpeg)
    }

    /// PNG bytes of a uniform RGBA frame.
    #[must_use]
    pub fn rgba_png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        Self::encode(&Self::rgba(width, height, rgba).image, ImageFormat::Png)
    }

    /// Bytes that no decoder accepts.
    #[must_use]
    pub fn garbage_bytes() -> Vec<u8> {
        b"this is plainly not an image, just some text".to_vec()
    }
}
