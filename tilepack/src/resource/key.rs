//! Resource keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coord::TileCoord;

/// A normalized identifier for one fetchable unit.
///
/// Keys are stable and hashable: identical keys produced by different packs
/// deduplicate to one stored copy in the pack store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    /// A style document, addressed by URL.
    Style {
        /// Absolute URL of the style document.
        url: String,
    },
    /// A sprite asset referenced by a style, addressed by URL.
    Sprite {
        /// Absolute URL of the sprite asset.
        url: String,
    },
    /// A glyph range referenced by a style, addressed by URL template.
    GlyphRange {
        /// URL (template) of the glyph range.
        url: String,
    },
    /// A map tile at z/x/y.
    Tile {
        /// Tile address.
        coord: TileCoord,
    },
}

impl ResourceKey {
    /// Convenience constructor for tile keys.
    pub fn tile(zoom: u8, x: u32, y: u32) -> Self {
        Self::Tile {
            coord: TileCoord { zoom, x, y },
        }
    }

    /// Canonical string form used as the storage key.
    ///
    /// The kind prefix keeps the key spaces disjoint: a tile and a style can
    /// never collide even if a tile URL were stored verbatim.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Style { url } => format!("style:{url}"),
            Self::Sprite { url } => format!("sprite:{url}"),
            Self::GlyphRange { url } => format!("glyphs:{url}"),
            Self::Tile { coord } => format!("tile:{coord}"),
        }
    }

    /// True for tile keys; tiles are the only kind subject to the quota.
    pub fn is_tile(&self) -> bool {
        matches!(self, Self::Tile { .. })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}
