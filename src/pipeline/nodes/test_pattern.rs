//! TestPatternSource: synthetic camera.
//!
//! Emits a dark diagonal gradient with a row of bright square markers that
//! drift to the right. Handy for exercising blur and detection items without
//! real hardware.

use crate::pipeline::image::Image;
use crate::pipeline::item::{IterationContext, Item, ItemBuilder, ItemType};
use crate::pipeline::param::{Config, Trim};
use crate::pipeline::port::Output;
use image::{Rgb, RgbImage};

/// Edge length of a marker in pixels.
const MARKER_SIZE: u32 = 3;

/// Brightest value the background gradient reaches.
const BACKGROUND_MAX: u32 = 96;

pub struct TestPatternSource {
    output: Output<Image>,
    width: Config<i64>,
    height: Config<i64>,
    markers: Config<i64>,
    speed: Trim,
    /// Frame size latched at start; changing it restarts the item.
    size: (u32, u32),
}

impl TestPatternSource {
    /// Marker centres for a frame, in left-to-right order.
    pub fn marker_positions(&self, iteration: u64) -> Vec<(u32, u32)> {
        let (width, height) = self.size;
        let count = self.markers.get().max(0) as u32;
        if width <= MARKER_SIZE || height <= MARKER_SIZE || count == 0 {
            return Vec::new();
        }

        let span = width - MARKER_SIZE;
        let shift = (iteration as f64 * self.speed.value()) as u64;
        (0..count)
            .map(|i| {
                let base = u64::from(i) * u64::from(span) / u64::from(count);
                let x = ((base + shift) % u64::from(span)) as u32 + MARKER_SIZE / 2;
                let y = (height / (count + 1)) * (i + 1);
                (x, y.min(height - 1 - MARKER_SIZE / 2).max(MARKER_SIZE / 2))
            })
            .collect()
    }

    fn render(&self, iteration: u64) -> RgbImage {
        let (width, height) = self.size;
        let diagonal = (width + height).max(1);
        let mut frame = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x + y) * BACKGROUND_MAX / diagonal) as u8;
            Rgb([v, v, v / 2])
        });

        let half = MARKER_SIZE / 2;
        for (cx, cy) in self.marker_positions(iteration) {
            for y in cy.saturating_sub(half)..=(cy + half).min(height - 1) {
                for x in cx.saturating_sub(half)..=(cx + half).min(width - 1) {
                    frame.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        frame
    }
}

impl Item for TestPatternSource {
    fn on_start(&mut self) {
        self.size = (
            self.width.get().max(0) as u32,
            self.height.get().max(0) as u32,
        );
        tracing::debug!(width = self.size.0, height = self.size.1, "test pattern started");
    }

    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        let frame = self.render(ctx.iteration);
        ctx.emit(&self.output, Image::new(frame));
        Ok(())
    }
}

impl ItemType for TestPatternSource {
    const TYPE_NAME: &'static str = "TestPattern";
    const DESCRIPTION: &'static str = "Synthetic frames with moving bright markers.";

    fn build(builder: &mut ItemBuilder) -> Self {
        let output = builder.add_output("image");
        let params = builder.params();
        Self {
            output,
            width: params.add_int("width", 320, 1, 4096, true),
            height: params.add_int("height", 240, 1, 4096, true),
            markers: params.add_int("markers", 3, 0, 64, false),
            speed: params.add_trim("speed", 1.0, 0.0, 10.0, 100, false, None),
            size: (0, 0),
        }
    }
}
