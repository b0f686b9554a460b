//! Typed Location / Area API over a [`GeoStore`]
//!
//! Requests and responses carry latitude/longitude in degrees. Internally a
//! Location is a [`Point`] with `x = longitude`, `y = latitude`; area rings
//! arrive as `[longitude, latitude]` pairs. A transport layer maps
//! [`GeoStoreError::kind`] onto its own status codes.

use crate::error::{GeoStoreError, Result};
use crate::geometry::{Geometry, Polygon};
use crate::spatial::Point;
use crate::store::{GeoStore, GeometryRecord};
use crate::types::{GeometryKind, RecordId};
use serde::{Deserialize, Serialize};
use tracing::debug;

const METERS_PER_KM: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Area payload. Only the first ring of `coordinates` is used; each
/// position is `[longitude, latitude]` and the ring may repeat its first
/// position at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateArea {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

/// Search circle for location listing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

/// Optional filters for [`GeoService::list_locations`]; set filters combine
/// with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFilter {
    pub area_id: Option<RecordId>,
    pub near: Option<Proximity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponse {
    pub id: RecordId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaResponse {
    pub id: RecordId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceResponse {
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsResponse {
    pub area_id: RecordId,
    pub area_name: String,
    pub point: Coordinates,
    pub contains: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

fn location_response(record: &GeometryRecord) -> Result<LocationResponse> {
    let point = record
        .geometry
        .as_point()
        .ok_or(GeoStoreError::NotFound(record.id))?;
    Ok(LocationResponse {
        id: record.id,
        name: record.name.clone(),
        latitude: point.lat(),
        longitude: point.lon(),
    })
}

fn area_response(record: &GeometryRecord) -> AreaResponse {
    AreaResponse {
        id: record.id,
        name: record.name.clone(),
        description: record.description.clone(),
    }
}

fn area_geometry(request: &CreateArea) -> Result<Geometry> {
    let ring = request.coordinates.first().ok_or_else(|| {
        GeoStoreError::InvalidGeometry("area needs at least one ring".to_string())
    })?;
    Ok(Geometry::Polygon(Polygon::from_coords(ring)?))
}

fn radius_meters(radius_km: f64) -> Result<f64> {
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(GeoStoreError::OutOfRange(format!(
            "radius must be a positive number of kilometers, got {}",
            radius_km
        )));
    }
    Ok(radius_km * METERS_PER_KM)
}

/// Location and Area operations over one shared store.
///
/// Construct once at startup and hand clones to request handlers; every
/// clone talks to the same store.
#[derive(Clone)]
pub struct GeoService {
    store: GeoStore,
}

impl GeoService {
    pub fn new(store: GeoStore) -> Self {
        Self { store }
    }

    /// Service over a fresh in-memory store
    pub fn memory() -> Result<Self> {
        Ok(Self::new(GeoStore::memory()?))
    }

    pub fn store(&self) -> &GeoStore {
        &self.store
    }

    fn point(&self, latitude: f64, longitude: f64) -> Result<Point> {
        let point = Point::from_lat_lon(latitude, longitude);
        if self.store.config()?.validate_coordinates {
            point.validate()?;
        }
        Ok(point)
    }

    pub fn create_location(&self, request: &CreateLocation) -> Result<LocationResponse> {
        let point = Point::from_lat_lon(request.latitude, request.longitude);
        let record = self
            .store
            .insert_record(request.name.clone(), Geometry::Point(point), None)?;
        location_response(&record)
    }

    pub fn get_location(&self, id: RecordId) -> Result<LocationResponse> {
        location_response(&self.store.get_kind(id, GeometryKind::Point)?)
    }

    /// All locations, or those matching `filter`.
    ///
    /// With a proximity filter the result is nearest first; otherwise it is
    /// ordered by id.
    pub fn list_locations(&self, filter: &LocationFilter) -> Result<Vec<LocationResponse>> {
        let contained = match filter.area_id {
            Some(area_id) => Some(self.store.query_contained_in(area_id)?),
            None => None,
        };

        let records = match (&filter.near, contained) {
            (Some(near), contained) => {
                let center = self.point(near.latitude, near.longitude)?;
                let nearby = self
                    .store
                    .query_within_radius(&center, radius_meters(near.radius_km)?)?;
                match contained {
                    Some(inside) => nearby
                        .into_iter()
                        .filter(|record| inside.iter().any(|r| r.id == record.id))
                        .collect(),
                    None => nearby,
                }
            }
            (None, Some(inside)) => inside,
            (None, None) => self.store.list_kind(GeometryKind::Point)?,
        };

        records
            .iter()
            .filter(|record| record.kind() == GeometryKind::Point)
            .map(location_response)
            .collect()
    }

    pub fn update_location(
        &self,
        id: RecordId,
        request: &CreateLocation,
    ) -> Result<LocationResponse> {
        let point = Point::from_lat_lon(request.latitude, request.longitude);
        let record =
            self.store
                .replace(id, Geometry::Point(point), request.name.clone(), None)?;
        location_response(&record)
    }

    pub fn delete_location(&self, id: RecordId) -> Result<DeleteResponse> {
        self.store.remove_kind(id, GeometryKind::Point)?;
        Ok(DeleteResponse {
            message: "Location deleted successfully".to_string(),
        })
    }

    pub fn create_area(&self, request: &CreateArea) -> Result<AreaResponse> {
        let geometry = area_geometry(request)?;
        let record = self
            .store
            .insert_record(request.name.clone(), geometry, request.description.clone())?;
        Ok(area_response(&record))
    }

    pub fn get_area(&self, id: RecordId) -> Result<AreaResponse> {
        Ok(area_response(
            &self.store.get_kind(id, GeometryKind::Polygon)?,
        ))
    }

    pub fn list_areas(&self) -> Result<Vec<AreaResponse>> {
        Ok(self
            .store
            .list_kind(GeometryKind::Polygon)?
            .iter()
            .map(area_response)
            .collect())
    }

    pub fn update_area(&self, id: RecordId, request: &CreateArea) -> Result<AreaResponse> {
        let geometry = area_geometry(request)?;
        let record = self.store.replace(
            id,
            geometry,
            request.name.clone(),
            request.description.clone(),
        )?;
        Ok(area_response(&record))
    }

    pub fn delete_area(&self, id: RecordId) -> Result<DeleteResponse> {
        self.store.remove_kind(id, GeometryKind::Polygon)?;
        Ok(DeleteResponse {
            message: "Area deleted successfully".to_string(),
        })
    }

    pub fn locations_in_area(&self, area_id: RecordId) -> Result<Vec<LocationResponse>> {
        self.store
            .query_contained_in(area_id)?
            .iter()
            .map(location_response)
            .collect()
    }

    /// Haversine distance in meters between two (latitude, longitude) pairs.
    pub fn distance(
        &self,
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    ) -> Result<DistanceResponse> {
        let a = self.point(lat1, lon1)?;
        let b = self.point(lat2, lon2)?;
        Ok(DistanceResponse {
            distance_meters: a.distance_to(&b),
        })
    }

    /// Locations within `radius_km` of the center, nearest first.
    pub fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<LocationResponse>> {
        let center = self.point(latitude, longitude)?;
        let radius = radius_meters(radius_km)?;
        let records = self.store.query_within_radius(&center, radius)?;
        debug!(%center, radius, hits = records.len(), "nearby search");

        records
            .iter()
            .filter(|record| record.kind() == GeometryKind::Point)
            .map(location_response)
            .collect()
    }

    pub fn contains(
        &self,
        area_id: RecordId,
        latitude: f64,
        longitude: f64,
    ) -> Result<ContainsResponse> {
        let point = self.point(latitude, longitude)?;
        let area = self.store.get_kind(area_id, GeometryKind::Polygon)?;
        let contains = self.store.contains(area_id, &point)?;

        Ok(ContainsResponse {
            area_id,
            area_name: area.name,
            point: Coordinates {
                latitude,
                longitude,
            },
            contains,
        })
    }

    pub fn intersecting_areas(&self, area_id: RecordId) -> Result<Vec<AreaResponse>> {
        Ok(self
            .store
            .query_intersecting_areas(area_id)?
            .iter()
            .map(area_response)
            .collect())
    }
}
