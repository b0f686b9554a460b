//! # GeoStore - An embedded geospatial record store
//!
//! GeoStore keeps named points ("Locations") and polygons ("Areas") in
//! memory, indexes their bounding boxes in an R-tree and answers spatial
//! questions with a filter/refine pipeline: the index yields candidates
//! whose boxes overlap the query region, exact predicates decide.
//!
//! ## Features
//!
//! - **R-tree Indexing**: Native quadratic-split R-tree, or the `rstar` R*-tree
//! - **Exact Predicates**: Winding-number point-in-polygon with inclusive boundaries, edge-crossing polygon intersection
//! - **Geodesic Distances**: Haversine point distances in meters, point-to-polygon distances
//! - **Thread-Safe**: One reader-writer lock over records and index, no partial updates
//! - **Persistent Storage**: Append-only file (AOF) with replay and compaction
//! - **Typed Service Layer**: Location / Area request and response types ready for a transport
//!
//! ## Quick Start
//!
//! ```rust
//! use geostore::{GeoStore, Geometry, Point, Polygon};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = GeoStore::memory()?;
//!
//! // Rings are [longitude, latitude] pairs
//! let district = Polygon::from_coords(&[
//!     [13.37, 52.50],
//!     [13.43, 52.50],
//!     [13.43, 52.54],
//!     [13.37, 52.54],
//! ])?;
//! let district_id = store.insert("Mitte", Geometry::Polygon(district), None)?;
//!
//! let tower = Point::from_lat_lon(52.5208, 13.4094);
//! let tower_id = store.insert("TV tower", Geometry::Point(tower), None)?;
//!
//! let inside = store.query_contained_in(district_id)?;
//! assert_eq!(inside[0].id, tower_id);
//!
//! let nearby = store.query_within_radius(&Point::from_lat_lon(52.52, 13.40), 1_000.0)?;
//! assert!(nearby.iter().any(|r| r.id == tower_id));
//! # Ok(())
//! # }
//! ```
//!
//! ## Service Layer
//!
//! ```rust
//! use geostore::service::{CreateLocation, GeoService};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = GeoService::memory()?;
//! let paris = service.create_location(&CreateLocation {
//!     name: "Paris".to_string(),
//!     latitude: 48.8566,
//!     longitude: 2.3522,
//! })?;
//!
//! let distance = service.distance(48.8566, 2.3522, 51.5074, -0.1278)?;
//! assert!((distance.distance_meters - 343_500.0).abs() < 2_000.0);
//! assert_eq!(service.nearby(48.85, 2.35, 5.0)?[0].id, paris.id);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod geometry;
pub mod index;
pub mod persistence;
pub mod predicates;
pub mod service;
pub mod spatial;
pub mod store;

pub mod types;

// Re-export core store types
pub use builder::StoreBuilder;
pub use error::{ErrorKind, GeoStoreError, Result};
pub use store::{GeoStore, GeometryRecord};

// Re-export spatial and geometry types
pub use geometry::{Geometry, Polygon, distance_to_polygon};
pub use spatial::{BoundingBox, EARTH_RADIUS_M, Point, distance};

// Re-export index types
pub use index::{RStarIndex, RTree, RTreeParams, SpatialIndex};

// Re-export configuration types
pub use types::{Config, GeometryKind, IndexBackend, RecordId, StoreStats, SyncPolicy};

// Re-export persistence types for advanced usage
pub use persistence::{AOFFile, StoreCommand};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        BoundingBox, Config, GeoStore, GeoStoreError, Geometry, GeometryKind, Point, Polygon,
        RecordId, Result, StoreBuilder,
    };
}
