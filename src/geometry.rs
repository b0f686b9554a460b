use crate::error::{GeoStoreError, Result};
use crate::predicates;
use crate::spatial::{BoundingBox, Point};
use crate::types::GeometryKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A polygon with a single outer ring and no holes.
///
/// The ring is stored open: the closing edge from the last vertex back to the
/// first is implied. Construction drops an explicit closing vertex and
/// collapses consecutive duplicates, then requires at least three distinct
/// vertices that are not all collinear. Self-intersecting rings are
/// accepted here; their signed area may cancel out to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(mut vertices: Vec<Point>) -> Result<Self> {
        if let Some(bad) = vertices
            .iter()
            .find(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(GeoStoreError::InvalidGeometry(format!(
                "non-finite vertex {}",
                bad
            )));
        }

        vertices.dedup();
        while vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(GeoStoreError::InvalidGeometry(format!(
                "polygon ring needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }

        let (a, b) = (vertices[0], vertices[1]);
        if vertices[2..]
            .iter()
            .all(|c| predicates::orientation(&a, &b, c) == 0.0)
        {
            return Err(GeoStoreError::InvalidGeometry(
                "polygon ring is degenerate (all vertices collinear)".to_string(),
            ));
        }

        Ok(Self { vertices })
    }

    /// Build from `[x, y]` (longitude, latitude) pairs.
    pub fn from_coords(coords: &[[f64; 2]]) -> Result<Self> {
        Self::new(coords.iter().map(|c| Point::new(c[0], c[1])).collect())
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Ring edges, including the implied closing edge.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let first = BoundingBox::from_point(&self.vertices[0]);
        self.vertices
            .iter()
            .skip(1)
            .fold(first, |mut bbox, p| {
                bbox.expand_to_point(p);
                bbox
            })
    }

    /// Shoelace area in square degrees; positive for counter-clockwise rings.
    pub fn signed_area(&self) -> f64 {
        self.edges()
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum::<f64>()
            / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.signed_area() > 0.0
    }

    /// Mean of the ring vertices.
    pub fn centroid(&self) -> Point {
        let n = self.vertices.len() as f64;
        let (sx, sy) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }

    /// True when no two edges cross or overlap except adjacent edges at
    /// their shared vertex. O(n²).
    pub fn is_simple(&self) -> bool {
        let edges: Vec<(Point, Point)> = self.edges().collect();
        let n = edges.len();

        for i in 0..n {
            let (a, b) = edges[i];
            let (_, c) = edges[(i + 1) % n];
            // An adjacent edge folding back over this one.
            if predicates::orientation(&a, &b, &c) == 0.0
                && (predicates::on_segment(&c, &a, &b) || predicates::on_segment(&a, &b, &c))
            {
                return false;
            }

            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    continue;
                }
                let (p, q) = edges[j];
                if predicates::segments_intersect(&a, &b, &p, &q) {
                    return false;
                }
            }
        }

        true
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        predicates::point_in_polygon(point, self)
    }

    pub fn intersects(&self, other: &Polygon) -> bool {
        predicates::polygons_intersect(self, other)
    }

    /// Distance in meters from `point`; zero when inside or on the boundary.
    pub fn distance_to_point(&self, point: &Point) -> f64 {
        distance_to_polygon(point, self)
    }
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = GeoStoreError;

    fn try_from(vertices: Vec<Point>) -> Result<Self> {
        Polygon::new(vertices)
    }
}

impl From<Polygon> for Vec<Point> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices
    }
}

impl From<&Polygon> for geo::Polygon<f64> {
    fn from(polygon: &Polygon) -> Self {
        let ring: Vec<geo::Coord<f64>> = polygon.vertices.iter().map(|&p| p.into()).collect();
        geo::Polygon::new(geo::LineString::from(ring), vec![])
    }
}

/// Distance in meters from `point` to `polygon`.
///
/// Zero when the point is inside or on the boundary. Otherwise the nearest
/// point on each edge is located in a local equirectangular frame centred
/// on `point` (longitudes scaled by `cos(lat)`), and the smallest haversine
/// distance to those nearest points is returned.
pub fn distance_to_polygon(point: &Point, polygon: &Polygon) -> f64 {
    if predicates::point_in_polygon(point, polygon) {
        return 0.0;
    }

    let scale = point.y.to_radians().cos().max(1e-12);
    let project = |p: &Point| ((p.x - point.x) * scale, p.y - point.y);

    polygon
        .edges()
        .map(|(a, b)| {
            let (ax, ay) = project(&a);
            let (bx, by) = project(&b);
            let (dx, dy) = (bx - ax, by - ay);
            let len2 = dx * dx + dy * dy;
            let t = if len2 == 0.0 {
                0.0
            } else {
                (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
            };
            let nearest = Point::new(point.x + (ax + t * dx) / scale, point.y + ay + t * dy);
            point.distance_to(&nearest)
        })
        .fold(f64::INFINITY, f64::min)
}

/// Any geometry the store can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    Polygon(Polygon),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::Polygon(_) => GeometryKind::Polygon,
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            Geometry::Point(point) => BoundingBox::from_point(point),
            Geometry::Polygon(polygon) => polygon.bounding_box(),
        }
    }

    pub fn as_point(&self) -> Option<&Point> {
        match self {
            Geometry::Point(point) => Some(point),
            _ => None,
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon> {
        match self {
            Geometry::Polygon(polygon) => Some(polygon),
            _ => None,
        }
    }

    /// Distance in meters from `point` to this geometry.
    pub fn distance_to_point(&self, point: &Point) -> f64 {
        match self {
            Geometry::Point(p) => p.distance_to(point),
            Geometry::Polygon(polygon) => distance_to_polygon(point, polygon),
        }
    }

    /// Check every coordinate against the WGS84 range.
    pub fn validate_coordinates(&self) -> Result<()> {
        match self {
            Geometry::Point(point) => point.validate(),
            Geometry::Polygon(polygon) => polygon.vertices().iter().try_for_each(Point::validate),
        }
    }

    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(p) => format!("POINT({} {})", p.x, p.y),
            Geometry::Polygon(polygon) => {
                let mut ring: Vec<String> = polygon
                    .vertices()
                    .iter()
                    .map(|p| format!("{} {}", p.x, p.y))
                    .collect();
                ring.push(ring[0].clone());
                format!("POLYGON(({}))", ring.join(", "))
            }
        }
    }

    /// GeoJSON geometry object; polygon rings are written closed.
    #[cfg(feature = "geojson")]
    pub fn to_geojson(&self) -> serde_json::Value {
        match self {
            Geometry::Point(p) => serde_json::json!({
                "type": "Point",
                "coordinates": [p.x, p.y],
            }),
            Geometry::Polygon(polygon) => {
                let mut ring: Vec<[f64; 2]> =
                    polygon.vertices().iter().map(|p| [p.x, p.y]).collect();
                ring.push(ring[0]);
                serde_json::json!({
                    "type": "Polygon",
                    "coordinates": [ring],
                })
            }
        }
    }

    /// Parse a GeoJSON `Point` or `Polygon`. Only the outer ring is kept.
    #[cfg(feature = "geojson")]
    pub fn from_geojson(value: &serde_json::Value) -> Result<Self> {
        let invalid = |msg: &str| GeoStoreError::InvalidGeometry(format!("GeoJSON: {}", msg));

        let coordinates = value
            .get("coordinates")
            .ok_or_else(|| invalid("missing coordinates"))?;
        let position = |v: &serde_json::Value| -> Result<Point> {
            match v.as_array().map(|a| a.as_slice()) {
                Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                    (Some(x), Some(y)) => Ok(Point::new(x, y)),
                    _ => Err(invalid("position must be numeric")),
                },
                _ => Err(invalid("position needs two values")),
            }
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("Point") => Ok(Geometry::Point(position(coordinates)?)),
            Some("Polygon") => {
                let ring = coordinates
                    .as_array()
                    .and_then(|rings| rings.first())
                    .and_then(|ring| ring.as_array())
                    .ok_or_else(|| invalid("polygon needs an outer ring"))?;
                let vertices = ring.iter().map(position).collect::<Result<Vec<_>>>()?;
                Ok(Geometry::Polygon(Polygon::new(vertices)?))
            }
            Some(other) => Err(invalid(&format!("unsupported type {}", other))),
            None => Err(invalid("missing type")),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wkt())
    }
}

impl From<Point> for Geometry {
    fn from(point: Point) -> Self {
        Geometry::Point(point)
    }
}

impl From<Polygon> for Geometry {
    fn from(polygon: Polygon) -> Self {
        Geometry::Polygon(polygon)
    }
}
