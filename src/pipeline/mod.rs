//! Item-based dataflow pipeline.
//!
//! Items (processing nodes) run on their own threads and exchange typed
//! streams through ports. An output publishes a type-erased
//! [`StreamObject`]; every input connected to it is notified synchronously
//! and keeps the latest object for its item's next iteration.
//!
//! # Architecture
//!
//! ```text
//! [TestPattern] ──image──► [GaussianBlur] ──output──► [BrightSpots] ──spots──► host
//!       ▲                        ▲                          ▲
//!       └────── ItemGraph: wiring, start/stop, topology ────┘
//!                                │
//!                     EventBridge (lifecycle, failures)
//! ```
//!
//! # Design
//!
//! - **Thread per item**: each `ItemHandle` owns one execution context; a
//!   failing or panicking iteration is contained to its item.
//! - **Latest-wins ports**: reads never block; an unconnected input reads `None`.
//! - **Shared payloads**: a published object is shared, never copied, by all
//!   consumers and released by its last holder.
//! - **Sealed overlays**: publishing a `Sparse<T>` freezes it for readers.

pub mod bridge;
pub mod error;
pub mod graph;
pub mod id;
pub mod image;
pub mod item;
pub mod nodes;
pub mod param;
pub mod port;
pub mod registry;
pub mod sparse;
pub mod stream;

pub use bridge::{EventBridge, EventSink, ItemEvent};
pub use error::{PipelineError, PipelineResult};
pub use graph::{ItemGraph, ItemSnapshot, LinkSnapshot, TopologySnapshot};
pub use id::{ItemId, PortId, SubscriberId};
pub use image::Image;
pub use item::{
    FailurePolicy, IterationContext, Item, ItemBuilder, ItemHandle, ItemOptions, ItemState,
    ItemType, MenuEntry, WidgetHandle,
};
pub use param::{
    ChoiceIndex, Config, FilePathMode, ParamDescriptor, ParamKind, ParamStore, ParamValue, Trim,
};
pub use port::{AnyInput, AnyOutput, Input, Output, PortDescriptor, PortDirection};
pub use registry::ItemRegistry;
pub use sparse::{Point, SourceId, SourceInfo, Sparse};
pub use stream::{StreamObject, StreamType, TypeTag};
