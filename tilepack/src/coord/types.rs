//! Coordinate types shared across the crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.051_128_78;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.051_128_78;

/// Minimum longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Minimum supported zoom level.
pub const MIN_ZOOM: u8 = 0;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Errors from coordinate conversion and region construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range.
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),

    /// Zoom level above the supported maximum.
    #[error("invalid zoom level: {0}")]
    InvalidZoom(u8),

    /// Zoom range where `min_zoom > max_zoom`.
    #[error("invalid zoom range: {from}..={to}")]
    InvalidZoomRange {
        /// Lower bound of the rejected range.
        from: u8,
        /// Upper bound of the rejected range.
        to: u8,
    },

    /// Bounding box whose south-west corner is not south-west of the
    /// north-east corner.
    #[error("invalid bounding box: sw ({sw_lat}, {sw_lon}) must be south-west of ne ({ne_lat}, {ne_lon})")]
    InvalidBounds {
        /// South-west latitude.
        sw_lat: f64,
        /// South-west longitude.
        sw_lon: f64,
        /// North-east latitude.
        ne_lat: f64,
        /// North-east longitude.
        ne_lon: f64,
    },
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl LatLon {
    /// Creates a point after validating both components.
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordError> {
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return Err(CoordError::InvalidLatitude(lat));
        }
        if !(MIN_LON..=MAX_LON).contains(&lon) {
            return Err(CoordError::InvalidLongitude(lon));
        }
        Ok(Self { lat, lon })
    }
}

/// A Web Mercator tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level.
    pub zoom: u8,
    /// Column (west to east).
    pub x: u32,
    /// Row (north to south).
    pub y: u32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lon_valid() {
        let p = LatLon::new(44.4967, -73.1829).unwrap();
        assert_eq!(p.lat, 44.4967);
        assert_eq!(p.lon, -73.1829);
    }

    #[test]
    fn test_lat_lon_rejects_pole() {
        let result = LatLon::new(90.0, 0.0);
        assert!(matches!(result, Err(CoordError::InvalidLatitude(_))));
    }

    #[test]
    fn test_lat_lon_rejects_wrapped_longitude() {
        let result = LatLon::new(0.0, 181.0);
        assert!(matches!(result, Err(CoordError::InvalidLongitude(_))));
    }

    #[test]
    fn test_tile_coord_display() {
        let tile = TileCoord { zoom: 12, x: 1205, y: 1539 };
        assert_eq!(tile.to_string(), "12/1205/1539");
    }
}
