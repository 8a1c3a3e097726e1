//! BrightSpotsItem: finds local brightness maxima.
//!
//! Publishes a `Sparse<Point>` anchored to the frame the spots were found
//! on, so overlay consumers can draw them over the right image.

use crate::pipeline::image::Image;
use crate::pipeline::item::{IterationContext, Item, ItemBuilder, ItemType};
use crate::pipeline::param::Config;
use crate::pipeline::port::{Input, Output};
use crate::pipeline::sparse::{Point, SourceId, Sparse};
use image::RgbImage;

/// Overlay source tag for detected spots.
pub const SPOTS_SOURCE: SourceId = SourceId(0);

pub struct BrightSpotsItem {
    input: Input<Image>,
    output: Output<Sparse<Point>>,
    threshold: Config<i64>,
    max_spots: Config<i64>,
    /// Latched at start; a threshold change restarts the item.
    active_threshold: u8,
}

#[inline]
fn luma(px: [u8; 3]) -> u8 {
    ((u32::from(px[0]) * 299 + u32::from(px[1]) * 587 + u32::from(px[2]) * 114) / 1000) as u8
}

/// Pixels at or above `threshold` that no 8-neighbour beats, in raster order.
///
/// Ties in a plateau resolve to the first pixel in raster order.
pub fn find_bright_spots(frame: &RgbImage, threshold: u8, limit: usize) -> Vec<Point> {
    let (width, height) = frame.dimensions();
    let at = |x: u32, y: u32| luma(frame.get_pixel(x, y).0);
    let mut spots = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if spots.len() >= limit {
                return spots;
            }
            let v = at(x, y);
            if v < threshold {
                continue;
            }

            let mut is_peak = true;
            'neighbours: for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = at(nx as u32, ny as u32);
                    // earlier neighbours win ties
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if n > v || (earlier && n == v) {
                        is_peak = false;
                        break 'neighbours;
                    }
                }
            }
            if is_peak {
                spots.push(Point::new(x as f32, y as f32));
            }
        }
    }
    spots
}

impl Item for BrightSpotsItem {
    fn on_start(&mut self) {
        self.active_threshold = self.threshold.get().clamp(0, 255) as u8;
    }

    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        let Some(frame) = self.input.take_new() else {
            return Ok(());
        };

        let limit = self.max_spots.get().max(0) as usize;
        let mut spots = Sparse::new((*frame).clone(), &[SPOTS_SOURCE]);
        spots.add_all(find_bright_spots(frame.pixels(), self.active_threshold, limit));
        tracing::trace!(item = %ctx.item(), count = spots.size(), "bright spots");
        ctx.emit(&self.output, spots);
        Ok(())
    }
}

impl ItemType for BrightSpotsItem {
    const TYPE_NAME: &'static str = "BrightSpots";
    const DESCRIPTION: &'static str = "Detects bright local maxima as a point overlay.";

    fn build(builder: &mut ItemBuilder) -> Self {
        let input = builder.add_input("image");
        let output = builder.add_output("spots");
        let params = builder.params();
        Self {
            input,
            output,
            threshold: params.add_int("threshold", 200, 0, 255, true),
            max_spots: params.add_int("max_spots", 64, 1, 10_000, false),
            active_threshold: 200,
        }
    }
}
