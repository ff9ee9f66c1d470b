//! Tilepack - Offline resource packs for tiled map data
//!
//! This library downloads and pins the resources a map region needs (style
//! document, sprite and glyph assets, and every tile in a bounding box over a
//! zoom range) so the region keeps working without network access. Resources
//! shared between overlapping packs are stored once and reference counted.
//!
//! The entry point is [`PackManager`]: add a pack over a [`Region`], resume
//! it to download, and watch progress through the event stream.

pub mod config;
pub mod coord;
mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod resource;
pub mod store;

pub use config::EngineConfig;
pub use coord::{LatLon, Region, TileCoord};
pub use error::PackError;
pub use events::{EventBus, EventStream, PackEvent};
pub use manager::{PackId, PackManager, PackProgress, PackSnapshot, PackState};
pub use resource::{HttpResourceProvider, ResourceKey, ResourceProvider};
