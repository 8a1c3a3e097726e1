//! GaussianBlurItem: smooths an image stream.
//!
//! Separable Gaussian convolution with edge clamping. Both the kernel size
//! and sigma are trims, so they can be tuned while frames flow.

use crate::pipeline::image::Image;
use crate::pipeline::item::{IterationContext, Item, ItemBuilder, ItemType};
use crate::pipeline::param::Trim;
use crate::pipeline::port::{Input, Output};
use image::RgbImage;

pub struct GaussianBlurItem {
    input: Input<Image>,
    output: Output<Image>,
    sigma: Trim,
    ksize: Trim,
}

/// Normalised 1D kernel of odd length `size`.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f32> {
    let size = if size % 2 == 0 { size + 1 } else { size.max(1) };
    let radius = (size / 2) as f64;
    let sigma = sigma.max(f64::EPSILON);
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - radius;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Blur `src` with `kernel` horizontally, then vertically.
pub fn convolve_separable(src: &RgbImage, kernel: &[f32]) -> RgbImage {
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 || kernel.len() <= 1 {
        return src.clone();
    }
    let radius = (kernel.len() / 2) as i64;

    let pass = |input: &RgbImage, horizontal: bool| {
        RgbImage::from_fn(width, height, |x, y| {
            let mut acc = [0.0f32; 3];
            for (k, weight) in kernel.iter().enumerate() {
                let offset = k as i64 - radius;
                let (sx, sy) = if horizontal {
                    ((x as i64 + offset).clamp(0, width as i64 - 1) as u32, y)
                } else {
                    (x, (y as i64 + offset).clamp(0, height as i64 - 1) as u32)
                };
                let px = input.get_pixel(sx, sy).0;
                for c in 0..3 {
                    acc[c] += weight * f32::from(px[c]);
                }
            }
            image::Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
        })
    };

    let horizontal = pass(src, true);
    pass(&horizontal, false)
}

impl Item for GaussianBlurItem {
    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        // unconnected or nothing new: idle
        let Some(frame) = self.input.take_new() else {
            return Ok(());
        };
        if frame.is_empty() {
            ctx.emit_arc(&self.output, frame);
            return Ok(());
        }

        let kernel = gaussian_kernel(self.ksize.value().round() as usize, self.sigma.value());
        let blurred = convolve_separable(frame.pixels(), &kernel);
        ctx.emit(&self.output, Image::new(blurred));
        Ok(())
    }
}

impl ItemType for GaussianBlurItem {
    const TYPE_NAME: &'static str = "GaussianBlur";
    const DESCRIPTION: &'static str = "Gaussian smoothing with live sigma and kernel size.";

    fn build(builder: &mut ItemBuilder) -> Self {
        let input = builder.add_input("input");
        let output = builder.add_output("output");
        let params = builder.params();
        Self {
            input,
            output,
            sigma: params.add_trim("sigma", 1.0, 0.1, 20.0, 100, true, None),
            ksize: params.add_trim("ksize", 5.0, 1.0, 31.0, 15, false, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::ItemId;
    use image::Rgb;
    use std::time::Duration;

    fn ctx() -> IterationContext {
        IterationContext::new(ItemId(0), Duration::ZERO, Duration::ZERO, 0)
    }

    #[test]
    fn test_kernel_is_normalised_and_odd() {
        let kernel = gaussian_kernel(4, 1.5);
        assert_eq!(kernel.len(), 5);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(kernel[2] > kernel[1] && kernel[1] > kernel[0]);
        assert!((kernel[0] - kernel[4]).abs() < 1e-7);
    }

    #[test]
    fn test_uniform_image_is_unchanged() {
        let src = RgbImage::from_pixel(6, 4, Rgb([40, 80, 120]));
        let out = convolve_separable(&src, &gaussian_kernel(5, 2.0));
        assert!(out.pixels().all(|p| p.0 == [40, 80, 120]));
    }

    #[test]
    fn test_impulse_spreads_out() {
        let mut src = RgbImage::new(9, 9);
        src.put_pixel(4, 4, Rgb([255, 255, 255]));
        let out = convolve_separable(&src, &gaussian_kernel(3, 1.0));
        let centre = out.get_pixel(4, 4).0[0];
        let neighbour = out.get_pixel(5, 4).0[0];
        assert!(centre < 255);
        assert!(neighbour > 0 && neighbour < centre);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_idles_without_new_input() {
        let mut builder = ItemBuilder::new();
        let mut item = GaussianBlurItem::build(&mut builder);
        let mut c = ctx();
        item.iterate(&mut c).unwrap();
        assert_eq!(c.staged_len(), 0);
    }

    #[test]
    fn test_blurs_each_new_frame_once() {
        let mut builder = ItemBuilder::new();
        let mut item = GaussianBlurItem::build(&mut builder);
        let upstream = Output::<Image>::new("camera");
        item.input.connect(&upstream);

        let mut frame = RgbImage::new(7, 7);
        frame.put_pixel(3, 3, Rgb([255, 0, 0]));
        upstream.publish(Image::new(frame)).unwrap();

        let mut c = ctx();
        item.iterate(&mut c).unwrap();
        assert_eq!(c.commit(), 1);
        let blurred = item.output.latest().unwrap();
        assert!(blurred.pixels().get_pixel(3, 3).0[0] < 255);

        let mut c = ctx();
        item.iterate(&mut c).unwrap();
        assert_eq!(c.staged_len(), 0);
    }

    #[test]
    fn test_empty_frame_passes_through() {
        let mut builder = ItemBuilder::new();
        let mut item = GaussianBlurItem::build(&mut builder);
        let upstream = Output::<Image>::new("camera");
        item.input.connect(&upstream);
        let empty = Image::default();
        upstream.publish(empty.clone()).unwrap();

        let mut c = ctx();
        item.iterate(&mut c).unwrap();
        c.commit();
        assert!(item.output.latest().unwrap().ptr_eq(&empty));
    }
}
