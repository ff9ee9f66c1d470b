//! Geographic regions for offline packs.
//!
//! A [`Region`] is a bounding box, an inclusive zoom range, and the URL of the
//! style document that renders it. Regions are immutable once attached to a
//! pack; the download engine enumerates every tile they cover.

use serde::{Deserialize, Serialize};

use super::types::{CoordError, LatLon, TileCoord, MAX_ZOOM};
use super::to_tile_coord;

/// The extent of an offline pack: bounding box + zoom range + style reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    sw: LatLon,
    ne: LatLon,
    min_zoom: u8,
    max_zoom: u8,
    style_url: String,
}

impl Region {
    /// Creates a region after validating the bounding box and zoom range.
    pub fn new(
        sw: LatLon,
        ne: LatLon,
        min_zoom: u8,
        max_zoom: u8,
        style_url: impl Into<String>,
    ) -> Result<Self, CoordError> {
        if sw.lat > ne.lat || sw.lon > ne.lon {
            return Err(CoordError::InvalidBounds {
                sw_lat: sw.lat,
                sw_lon: sw.lon,
                ne_lat: ne.lat,
                ne_lon: ne.lon,
            });
        }
        if min_zoom > max_zoom {
            return Err(CoordError::InvalidZoomRange {
                from: min_zoom,
                to: max_zoom,
            });
        }
        if max_zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(max_zoom));
        }
        Ok(Self {
            sw,
            ne,
            min_zoom,
            max_zoom,
            style_url: style_url.into(),
        })
    }

    /// South-west corner of the bounding box.
    pub fn sw(&self) -> LatLon {
        self.sw
    }

    /// North-east corner of the bounding box.
    pub fn ne(&self) -> LatLon {
        self.ne
    }

    /// Lower bound of the inclusive zoom range.
    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    /// Upper bound of the inclusive zoom range.
    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// URL of the style document this region renders with.
    pub fn style_url(&self) -> &str {
        &self.style_url
    }

    /// Enumerates every tile inside the bounding box for each zoom level in
    /// the inclusive range.
    ///
    /// Tiles are yielded zoom-major, west-to-east within each row.
    pub fn tile_coords(&self) -> Vec<TileCoord> {
        let mut tiles = Vec::new();
        for zoom in self.min_zoom..=self.max_zoom {
            // Northwest corner has the smallest (x, y); southeast the largest.
            // Region construction validated the bounds, so conversion cannot
            // fail here.
            let Ok(nw) = to_tile_coord(self.ne.lat, self.sw.lon, zoom) else {
                continue;
            };
            let Ok(se) = to_tile_coord(self.sw.lat, self.ne.lon, zoom) else {
                continue;
            };
            for y in nw.y..=se.y {
                for x in nw.x..=se.x {
                    tiles.push(TileCoord { zoom, x, y });
                }
            }
        }
        tiles
    }

    /// Number of tiles `tile_coords` would yield.
    pub fn tile_count(&self) -> u64 {
        let mut count = 0u64;
        for zoom in self.min_zoom..=self.max_zoom {
            let (Ok(nw), Ok(se)) = (
                to_tile_coord(self.ne.lat, self.sw.lon, zoom),
                to_tile_coord(self.sw.lat, self.ne.lon, zoom),
            ) else {
                continue;
            };
            count += (se.x - nw.x + 1) as u64 * (se.y - nw.y + 1) as u64;
        }
        count
    }
}
