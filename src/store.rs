use crate::error::{GeoStoreError, Result};
use crate::geometry::{Geometry, Polygon};
use crate::index::{SpatialIndex, new_index};
use crate::persistence::{AOFFile, StoreCommand};
use crate::predicates;
use crate::spatial::{BoundingBox, Point, radius_window_degrees};
use crate::types::{Config, GeometryKind, RecordId, StoreStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// A named geometry owned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub id: RecordId,
    pub name: String,
    pub description: Option<String>,
    pub geometry: Geometry,
    /// Cached bounding box of `geometry`
    pub bbox: BoundingBox,
}

impl GeometryRecord {
    pub fn new(
        id: RecordId,
        name: String,
        description: Option<String>,
        geometry: Geometry,
    ) -> Self {
        let bbox = geometry.bounding_box();
        Self {
            id,
            name,
            description,
            geometry,
            bbox,
        }
    }

    pub fn kind(&self) -> GeometryKind {
        self.geometry.kind()
    }
}

/// Embedded geometry store.
///
/// Records and their index live behind one reader-writer lock: every
/// mutation updates both under the write lock, queries share the read lock.
/// Cloning yields another handle to the same store.
///
/// # Examples
///
/// ```rust
/// use geostore::{GeoStore, Geometry, Point, Polygon};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = GeoStore::memory()?;
///
/// let park = Polygon::from_coords(&[[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]])?;
/// let park_id = store.insert("park", Geometry::Polygon(park), None)?;
/// let bench_id = store.insert("bench", Geometry::Point(Point::new(5.0, 5.0)), None)?;
/// store.insert("cafe", Geometry::Point(Point::new(15.0, 15.0)), None)?;
///
/// let inside = store.query_contained_in(park_id)?;
/// assert_eq!(inside.len(), 1);
/// assert_eq!(inside[0].id, bench_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GeoStore {
    inner: Arc<RwLock<StoreInner>>,
}

struct StoreInner {
    records: BTreeMap<RecordId, GeometryRecord>,
    index: Box<dyn SpatialIndex>,
    /// Next id to issue; never decreases
    next_id: RecordId,
    aof_file: Option<AOFFile>,
    config: Config,
    stats: StoreStats,
    closed: bool,
}

impl GeoStore {
    /// In-memory store with default configuration
    pub fn memory() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// In-memory store with custom configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Self::from_parts(config, None)
    }

    /// Store persisted to the AOF at `path`, replaying it if present
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let aof_file = AOFFile::open_with_policy(path, config.sync_policy)?;
        Self::from_parts(config, Some(aof_file))
    }

    fn from_parts(config: Config, aof_file: Option<AOFFile>) -> Result<Self> {
        let mut inner = StoreInner {
            records: BTreeMap::new(),
            index: new_index(&config)?,
            next_id: 1,
            aof_file: None,
            config,
            stats: StoreStats::default(),
            closed: false,
        };

        if let Some(mut aof_file) = aof_file {
            let commands = aof_file.replay()?;
            let replayed = commands.len();
            for command in commands {
                inner.apply(command)?;
            }
            info!(
                path = %aof_file.path().display(),
                replayed,
                records = inner.records.len(),
                next_id = inner.next_id,
                "opened persistent store"
            );
            inner.aof_file = Some(aof_file);
        } else {
            debug!(backend = ?inner.config.index_backend, "opened in-memory store");
        }

        Ok(GeoStore {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    pub fn config(&self) -> Result<Config> {
        let inner = self.read()?;
        Ok(inner.config.clone())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let mut stats = inner.stats.clone();
        stats.aof_size = inner.aof_file.as_ref().map_or(0, |aof| aof.size());
        Ok(stats)
    }

    /// Insert a new record and return its freshly issued id.
    pub fn insert(
        &self,
        name: impl Into<String>,
        geometry: Geometry,
        description: Option<String>,
    ) -> Result<RecordId> {
        self.insert_record(name, geometry, description)
            .map(|record| record.id)
    }

    /// Insert a new record and return it as stored.
    pub fn insert_record(
        &self,
        name: impl Into<String>,
        geometry: Geometry,
        description: Option<String>,
    ) -> Result<GeometryRecord> {
        let name = name.into();
        let mut inner = self.write()?;
        inner.ensure_open()?;
        inner.check_geometry(&geometry)?;

        let id = inner.next_id;
        inner.log(StoreCommand::Insert {
            id,
            name: name.clone(),
            description: description.clone(),
            geometry: geometry.clone(),
        })?;
        let record = GeometryRecord::new(id, name, description, geometry);
        inner.apply_insert(record.clone())?;

        debug!(id, kind = %record.kind(), "inserted record");
        Ok(record)
    }

    pub fn get(&self, id: RecordId) -> Result<GeometryRecord> {
        let inner = self.read()?;
        inner.ensure_open()?;
        inner.record(id).cloned()
    }

    /// Like [`GeoStore::get`], but a record of another kind is `NotFound`.
    pub fn get_kind(&self, id: RecordId, kind: GeometryKind) -> Result<GeometryRecord> {
        let inner = self.read()?;
        inner.ensure_open()?;
        inner.record_of_kind(id, kind).cloned()
    }

    /// Every record, ordered by id
    pub fn list(&self) -> Result<Vec<GeometryRecord>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        Ok(inner.records.values().cloned().collect())
    }

    /// Records of one kind, ordered by id
    pub fn list_kind(&self, kind: GeometryKind) -> Result<Vec<GeometryRecord>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        Ok(inner
            .records
            .values()
            .filter(|record| record.kind() == kind)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Swap the geometry, name and description of an existing record.
    ///
    /// The new geometry must be of the same kind as the stored one; a
    /// record of another kind is reported as `NotFound`. The index box is
    /// moved in the same critical section as the record contents.
    pub fn replace(
        &self,
        id: RecordId,
        geometry: Geometry,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<GeometryRecord> {
        let name = name.into();
        let mut inner = self.write()?;
        inner.ensure_open()?;
        inner.record_of_kind(id, geometry.kind())?;
        inner.check_geometry(&geometry)?;

        inner.log(StoreCommand::Replace {
            id,
            name: name.clone(),
            description: description.clone(),
            geometry: geometry.clone(),
        })?;
        let record = GeometryRecord::new(id, name, description, geometry);
        inner.apply_replace(record.clone())?;

        debug!(id, bbox = %record.bbox, "replaced record");
        Ok(record)
    }

    /// Delete a record from the index and the store.
    pub fn remove(&self, id: RecordId) -> Result<GeometryRecord> {
        let mut inner = self.write()?;
        inner.ensure_open()?;
        inner.record(id)?;
        inner.remove_logged(id)
    }

    /// Like [`GeoStore::remove`], but a record of another kind is `NotFound`.
    pub fn remove_kind(&self, id: RecordId, kind: GeometryKind) -> Result<GeometryRecord> {
        let mut inner = self.write()?;
        inner.ensure_open()?;
        inner.record_of_kind(id, kind)?;
        inner.remove_logged(id)
    }

    /// Locations lying inside or on the boundary of area `area_id`.
    ///
    /// Index candidates overlapping the area's box are refined with the
    /// exact point-in-polygon test.
    pub fn query_contained_in(&self, area_id: RecordId) -> Result<Vec<GeometryRecord>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        let (area, bbox) = inner.area(area_id)?;

        Ok(inner
            .candidate_records(bbox)
            .filter(|record| {
                record
                    .geometry
                    .as_point()
                    .is_some_and(|point| predicates::point_in_polygon(point, area))
            })
            .cloned()
            .collect())
    }

    /// Records of either kind within `radius_meters` of `center`, nearest
    /// first with ties by id.
    ///
    /// Points are measured with the haversine distance, areas by their
    /// nearest edge (zero when `center` is inside).
    pub fn query_within_radius(
        &self,
        center: &Point,
        radius_meters: f64,
    ) -> Result<Vec<GeometryRecord>> {
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(GeoStoreError::OutOfRange(format!(
                "radius must be a positive number of meters, got {}",
                radius_meters
            )));
        }

        let inner = self.read()?;
        inner.ensure_open()?;
        inner.check_point(center)?;

        let (dlat, dlon) = radius_window_degrees(center, radius_meters);
        let reach = dlat.hypot(dlon);

        let mut hits: Vec<(f64, &GeometryRecord)> = inner
            .index
            .query_nearest(center, reach)
            .into_iter()
            .filter_map(|id| inner.records.get(&id))
            .filter_map(|record| {
                let distance = record.geometry.distance_to_point(center);
                (distance <= radius_meters).then_some((distance, record))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));

        Ok(hits.into_iter().map(|(_, record)| record.clone()).collect())
    }

    /// Other areas whose polygon intersects area `area_id`, containment
    /// either way included.
    pub fn query_intersecting_areas(&self, area_id: RecordId) -> Result<Vec<GeometryRecord>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        let (area, bbox) = inner.area(area_id)?;

        Ok(inner
            .candidate_records(bbox)
            .filter(|record| record.id != area_id)
            .filter(|record| {
                record
                    .geometry
                    .as_polygon()
                    .is_some_and(|other| predicates::polygons_intersect(area, other))
            })
            .cloned()
            .collect())
    }

    /// Whether area `area_id` contains `point` (boundary inclusive).
    pub fn contains(&self, area_id: RecordId, point: &Point) -> Result<bool> {
        let inner = self.read()?;
        inner.ensure_open()?;
        inner.check_point(point)?;
        let (area, _) = inner.area(area_id)?;
        Ok(predicates::point_in_polygon(point, area))
    }

    /// Raw index candidates overlapping `bbox`, ascending ids.
    pub fn candidates(&self, bbox: &BoundingBox) -> Result<Vec<RecordId>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        let mut ids = inner.index.query_intersecting(bbox);
        ids.sort_unstable();
        Ok(ids)
    }

    /// The box the index currently holds for `id`
    pub fn indexed_bbox(&self, id: RecordId) -> Result<Option<BoundingBox>> {
        let inner = self.read()?;
        inner.ensure_open()?;
        Ok(inner.index.get(id))
    }

    /// Rewrite the AOF as a watermark plus one insert per live record.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.ensure_open()?;

        let mut commands = Vec::with_capacity(inner.records.len() + 1);
        commands.push(StoreCommand::Watermark {
            next_id: inner.next_id,
        });
        commands.extend(inner.records.values().map(|record| StoreCommand::Insert {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            geometry: record.geometry.clone(),
        }));

        if let Some(ref mut aof_file) = inner.aof_file {
            aof_file.rewrite(&commands)?;
        }
        Ok(())
    }

    /// Force a sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(ref mut aof_file) = inner.aof_file {
            aof_file.sync()?;
        }
        Ok(())
    }

    /// Flush and close; further calls on any handle fail with `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.closed {
            return Ok(());
        }

        if let Some(ref mut aof_file) = inner.aof_file {
            aof_file.sync()?;
        }

        inner.closed = true;
        info!(records = inner.records.len(), "store closed");
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| GeoStoreError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| GeoStoreError::Lock("Failed to acquire write lock".to_string()))
    }
}

impl StoreInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GeoStoreError::StoreClosed);
        }
        Ok(())
    }

    fn record(&self, id: RecordId) -> Result<&GeometryRecord> {
        self.records.get(&id).ok_or(GeoStoreError::NotFound(id))
    }

    fn record_of_kind(&self, id: RecordId, kind: GeometryKind) -> Result<&GeometryRecord> {
        match self.records.get(&id) {
            Some(record) if record.kind() == kind => Ok(record),
            _ => Err(GeoStoreError::NotFound(id)),
        }
    }

    fn area(&self, id: RecordId) -> Result<(&Polygon, BoundingBox)> {
        let record = self.record_of_kind(id, GeometryKind::Polygon)?;
        match record.geometry.as_polygon() {
            Some(polygon) => Ok((polygon, record.bbox)),
            None => Err(GeoStoreError::NotFound(id)),
        }
    }

    /// Filter phase: records whose box overlaps `bbox`, ascending ids.
    fn candidate_records(&self, bbox: BoundingBox) -> impl Iterator<Item = &GeometryRecord> {
        let mut ids = self.index.query_intersecting(&bbox);
        ids.sort_unstable();
        ids.into_iter().filter_map(move |id| self.records.get(&id))
    }

    fn check_point(&self, point: &Point) -> Result<()> {
        if self.config.validate_coordinates {
            return point.validate();
        }
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(GeoStoreError::OutOfRange(format!(
                "non-finite coordinate {}",
                point
            )));
        }
        Ok(())
    }

    fn check_geometry(&self, geometry: &Geometry) -> Result<()> {
        match geometry {
            Geometry::Point(point) => self.check_point(point),
            Geometry::Polygon(polygon) => {
                if self.config.validate_coordinates {
                    geometry.validate_coordinates()?;
                }
                if self.config.reject_self_intersecting && !polygon.is_simple() {
                    return Err(GeoStoreError::InvalidGeometry(
                        "polygon ring intersects itself".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Append to the AOF, if any, before the in-memory state changes.
    fn log(&mut self, command: StoreCommand) -> Result<()> {
        if let Some(ref mut aof_file) = self.aof_file {
            aof_file.append(&command)?;
        }
        Ok(())
    }

    fn remove_logged(&mut self, id: RecordId) -> Result<GeometryRecord> {
        self.log(StoreCommand::Remove { id })?;
        let record = self.apply_remove(id)?;
        debug!(id, kind = %record.kind(), "removed record");
        Ok(record)
    }

    fn apply(&mut self, command: StoreCommand) -> Result<()> {
        match command {
            StoreCommand::Insert {
                id,
                name,
                description,
                geometry,
            } => self.apply_insert(GeometryRecord::new(id, name, description, geometry)),
            StoreCommand::Replace {
                id,
                name,
                description,
                geometry,
            } => self.apply_replace(GeometryRecord::new(id, name, description, geometry)),
            StoreCommand::Remove { id } => self.apply_remove(id).map(|_| ()),
            StoreCommand::Watermark { next_id } => {
                self.next_id = self.next_id.max(next_id);
                Ok(())
            }
        }
    }

    fn apply_insert(&mut self, record: GeometryRecord) -> Result<()> {
        self.index.insert(record.id, record.bbox)?;
        self.next_id = self.next_id.max(record.id + 1);
        match record.kind() {
            GeometryKind::Point => self.stats.location_count += 1,
            GeometryKind::Polygon => self.stats.area_count += 1,
        }
        self.stats.insert_count += 1;
        self.records.insert(record.id, record);
        Ok(())
    }

    fn apply_replace(&mut self, record: GeometryRecord) -> Result<()> {
        self.index.update(record.id, record.bbox)?;
        self.stats.replace_count += 1;
        self.records.insert(record.id, record);
        Ok(())
    }

    fn apply_remove(&mut self, id: RecordId) -> Result<GeometryRecord> {
        self.index.remove(id)?;
        let record = self.records.remove(&id).ok_or(GeoStoreError::NotFound(id))?;
        match record.kind() {
            GeometryKind::Point => self.stats.location_count -= 1,
            GeometryKind::Polygon => self.stats.area_count -= 1,
        }
        self.stats.remove_count += 1;
        Ok(record)
    }
}
