//! Shared read-only raster used as a stream payload and as the base of
//! sparse overlays.

use crate::pipeline::stream::StreamType;
use image::{Rgb, RgbImage};
use std::fmt;
use std::sync::Arc;

/// Cheaply clonable handle to an immutable RGB frame.
///
/// Once wrapped, the pixels are never mutated; every clone (including the
/// base image of any `Sparse` built on it) points at the same buffer.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<RgbImage>,
}

impl Image {
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// A `width` x `height` frame filled with one colour.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }

    #[inline]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Whether both handles share one pixel buffer.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl Default for Image {
    fn default() -> Self {
        Self::new(RgbImage::new(0, 0))
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl StreamType for Image {
    fn type_name() -> &'static str {
        "Image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_pixels() {
        let a = Image::filled(4, 3, [10, 20, 30]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(b.width(), 4);
        assert_eq!(b.height(), 3);
        assert_eq!(b.pixels().get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_default_is_empty() {
        assert!(Image::default().is_empty());
        assert!(!Image::filled(1, 1, [0, 0, 0]).is_empty());
    }
}
