//! Spatial primitives for the geometry store
//!
//! This module provides the point and bounding-box value types and the
//! distance model shared by the index, the predicates and the store.

use crate::error::{GeoStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used by the haversine model, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// A geographic position in WGS84 degrees.
///
/// Internally a point is stored in `(x, y)` = `(longitude, latitude)` order.
/// API boundaries usually speak `(latitude, longitude)`; use
/// [`Point::from_lat_lon`] there so the axis swap happens in exactly one place.
///
/// # Examples
///
/// ```rust
/// use geostore::Point;
///
/// let nyc = Point::from_lat_lon(40.7128, -74.0060);
/// assert_eq!(nyc.x, -74.0060);
/// assert_eq!(nyc.lat(), 40.7128);
///
/// let london = Point::from_lat_lon(51.5074, -0.1278);
/// let km = nyc.distance_to(&london) / 1000.0;
/// assert!(km > 5500.0 && km < 5600.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Longitude in decimal degrees (-180.0 to +180.0)
    pub x: f64,
    /// Latitude in decimal degrees (-90.0 to +90.0)
    pub y: f64,
}

impl Point {
    /// Creates a point from `x` (longitude) and `y` (latitude).
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Creates a point from API-order `(latitude, longitude)` arguments.
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        Self { x: lon, y: lat }
    }

    pub fn lat(&self) -> f64 {
        self.y
    }

    pub fn lon(&self) -> f64 {
        self.x
    }

    /// Check that the point is finite and inside ±90 latitude / ±180 longitude.
    pub fn validate(&self) -> Result<()> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(GeoStoreError::OutOfRange(format!(
                "coordinates must be finite, got {}",
                self
            )));
        }
        if !(-90.0..=90.0).contains(&self.y) {
            return Err(GeoStoreError::OutOfRange(format!(
                "latitude {} outside [-90, 90]",
                self.y
            )));
        }
        if !(-180.0..=180.0).contains(&self.x) {
            return Err(GeoStoreError::OutOfRange(format!(
                "longitude {} outside [-180, 180]",
                self.x
            )));
        }
        Ok(())
    }

    /// Great-circle distance to `other` in meters (haversine, spherical Earth).
    ///
    /// The spherical model is accurate to roughly 0.5% against the WGS84
    /// ellipsoid. The result is symmetric and exactly zero for equal points.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let lat1 = self.y * TO_RAD;
        let lat2 = other.y * TO_RAD;
        let half_dlat = ((other.y - self.y) * TO_RAD * 0.5).abs();
        let half_dlon = ((other.x - self.x) * TO_RAD * 0.5).abs();

        let sin_half_dlat = half_dlat.sin();
        let sin_half_dlon = half_dlon.sin();

        let a =
            sin_half_dlat * sin_half_dlat + lat1.cos() * lat2.cos() * sin_half_dlon * sin_half_dlon;
        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Check if this point lies within `radius_meters` of `center` (inclusive).
    pub fn within_distance(&self, center: &Point, radius_meters: f64) -> bool {
        self.distance_to(center) <= radius_meters
    }

    /// Planar Euclidean distance in coordinate units (degrees).
    pub fn planar_distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.x, self.y)
    }
}

impl From<Point> for geo::Coord<f64> {
    fn from(point: Point) -> Self {
        geo::Coord {
            x: point.x,
            y: point.y,
        }
    }
}

impl From<geo::Coord<f64>> for Point {
    fn from(coord: geo::Coord<f64>) -> Self {
        Point::new(coord.x, coord.y)
    }
}

impl From<Point> for geo::Point<f64> {
    fn from(point: Point) -> Self {
        geo::Point::new(point.x, point.y)
    }
}

/// Haversine distance in meters between two points.
pub fn distance(a: &Point, b: &Point) -> f64 {
    a.distance_to(b)
}

/// Axis-aligned rectangle in coordinate space.
///
/// Invariant: `min_x <= max_x` and `min_y <= max_y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a box from two corners in any order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::{BoundingBox, Point};
    ///
    /// let bbox = BoundingBox::new(10.0, 0.0, 0.0, 10.0);
    /// assert_eq!(bbox.min_x, 0.0);
    /// assert!(bbox.contains_point(&Point::new(5.0, 5.0)));
    /// assert!(bbox.contains_point(&Point::new(0.0, 5.0))); // boundary counts
    /// ```
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate box covering a single point.
    pub fn from_point(point: &Point) -> Self {
        Self {
            min_x: point.x,
            min_y: point.y,
            max_x: point.x,
            max_y: point.y,
        }
    }

    /// Smallest box enclosing all points, `None` when there are none.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::from_point(first);
        for point in iter {
            bbox.expand_to_point(point);
        }
        Some(bbox)
    }

    /// Inclusive overlap test: shared edges and corners count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn expand(&mut self, other: &BoundingBox) {
        *self = self.union(other);
    }

    pub fn expand_to_point(&mut self, point: &Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Half perimeter; separates boxes that all have zero area.
    pub fn margin(&self) -> f64 {
        self.width() + self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Planar distance from `point` to the nearest point of the box (0 inside).
    pub fn distance_to_point(&self, point: &Point) -> f64 {
        let dx = (self.min_x - point.x).max(0.0).max(point.x - self.max_x);
        let dy = (self.min_y - point.y).max(0.0).max(point.y - self.max_y);
        dx.hypot(dy)
    }

    /// Search window guaranteed to enclose every point within `radius_meters`
    /// (haversine) of `center`.
    ///
    /// The latitude span is `r / R`; the longitude span is
    /// `asin(sin(r / R) / cos(lat))`, widened to the whole ±180 range when the
    /// window reaches a pole. The window is clamped to valid coordinates and
    /// does not wrap around the antimeridian.
    pub fn around(center: &Point, radius_meters: f64) -> BoundingBox {
        let (dlat, dlon) = radius_window_degrees(center, radius_meters);
        BoundingBox {
            min_x: (center.x - dlon).max(-180.0),
            min_y: (center.y - dlat).max(-90.0),
            max_x: (center.x + dlon).min(180.0),
            max_y: (center.y + dlat).min(90.0),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Half-extents `(lat_degrees, lon_degrees)` of the window enclosing a
/// haversine circle of `radius_meters` around `center`.
pub fn radius_window_degrees(center: &Point, radius_meters: f64) -> (f64, f64) {
    let angular = radius_meters.max(0.0) / EARTH_RADIUS_M;
    if angular >= std::f64::consts::PI {
        return (180.0, 360.0);
    }

    let dlat = angular / TO_RAD;
    let lat = center.y * TO_RAD;
    let reaches_pole = center.y + dlat >= 90.0 || center.y - dlat <= -90.0;
    let ratio = angular.sin() / lat.cos();

    let dlon = if reaches_pole || !ratio.is_finite() || ratio >= 1.0 {
        360.0
    } else {
        ratio.asin() / TO_RAD
    };

    (dlat, dlon)
}
