//! # itemflow: typed dataflow core for visual robotics pipelines
//!
//! User-authored "items" are wired into a directed graph. Each item consumes
//! typed streams from upstream items and produces typed streams for
//! downstream ones, with live-tunable parameters (trims and configs) exposed
//! to a control surface.
//!
//! ## Architecture
//!
//! - **Pipeline**: ports, stream objects, sparse overlays and the
//!   thread-per-item execution model (see [`pipeline`])
//! - **Configuration**: engine-wide pacing and logging settings stored as JSON
//! - **Communication**: crossbeam channels for item wake-ups and host events
//!
//! ## Configuration
//!
//! The engine config is stored in the platform-appropriate data directory
//! under `dev.itemflow`:
//!
//! - **Linux**: `~/.local/share/dev.itemflow/`
//! - **macOS**: `~/Library/Application Support/dev.itemflow/`
//! - **Windows**: `%APPDATA%\dev.itemflow\`
//!
//! ## Example
//!
//! ```ignore
//! use itemflow::config::EngineConfig;
//! use itemflow::pipeline::nodes::{GaussianBlurItem, TestPatternSource};
//! use itemflow::pipeline::{ItemGraph, ItemRegistry};
//!
//! let config = EngineConfig::default();
//! let (mut graph, bridge) = ItemGraph::new(
//!     ItemRegistry::with_builtins(),
//!     config.item_options(),
//!     config.event_channel_capacity,
//! );
//!
//! let camera = graph.add_item::<TestPatternSource>()?;
//! let blur = graph.add_item::<GaussianBlurItem>()?;
//! graph.connect((camera, "image"), (blur, "input"))?;
//! graph.start_all()?;
//!
//! for event in bridge.drain() {
//!     println!("{:?}", event);
//! }
//! graph.stop_all();
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{ItemFlowError, Result};
pub use pipeline::{ItemGraph, ItemRegistry};
