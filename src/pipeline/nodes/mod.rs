//! Built-in item implementations.

pub mod bright_spots;
pub mod gaussian_blur;
pub mod test_pattern;

pub use bright_spots::BrightSpotsItem;
pub use gaussian_blur::{convolve_separable, gaussian_kernel, GaussianBlurItem};
pub use test_pattern::TestPatternSource;
