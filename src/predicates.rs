//! Exact spatial predicates
//!
//! These are the refine step of every store query: the index returns
//! bounding-box candidates, and the functions here decide the true answer.
//! All functions are pure and operate in planar coordinate space except
//! [`within_radius`], which uses the haversine distance model.
//!
//! Boundaries are inclusive throughout: a point on a polygon edge is
//! contained, and polygons that only touch intersect.

use crate::geometry::Polygon;
use crate::spatial::Point;

/// Distance in degrees under which a point counts as lying on an edge
/// (about 0.1 mm at the equator).
pub const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Twice the signed area of triangle `(a, b, c)`: positive when `c` lies to
/// the left of `a -> b`, negative to the right, zero when collinear.
pub fn orientation(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

/// Check whether `p` lies on the closed segment `a -> b`.
pub fn on_segment(p: &Point, a: &Point, b: &Point) -> bool {
    let within_x = p.x >= a.x.min(b.x) - BOUNDARY_TOLERANCE && p.x <= a.x.max(b.x) + BOUNDARY_TOLERANCE;
    let within_y = p.y >= a.y.min(b.y) - BOUNDARY_TOLERANCE && p.y <= a.y.max(b.y) + BOUNDARY_TOLERANCE;
    if !within_x || !within_y {
        return false;
    }

    let length = a.planar_distance(b);
    if length == 0.0 {
        return p.planar_distance(a) <= BOUNDARY_TOLERANCE;
    }
    orientation(a, b, p).abs() / length <= BOUNDARY_TOLERANCE
}

/// Closed-segment intersection test; touching endpoints and collinear
/// overlap both count.
pub fn segments_intersect(p1: &Point, p2: &Point, q1: &Point, q2: &Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    on_segment(p1, q1, q2) || on_segment(p2, q1, q2) || on_segment(q1, p1, p2) || on_segment(q2, p1, p2)
}

/// Check whether `point` lies on any edge of `polygon`.
pub fn point_on_boundary(point: &Point, polygon: &Polygon) -> bool {
    polygon.edges().any(|(a, b)| on_segment(point, &a, &b))
}

/// Point-in-polygon test using the winding number.
///
/// Points on the boundary count as contained. The result does not depend
/// on where the ring starts or on its winding direction.
///
/// # Examples
///
/// ```rust
/// use geostore::{Point, Polygon};
/// use geostore::predicates::point_in_polygon;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let square = Polygon::from_coords(&[[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]])?;
/// assert!(point_in_polygon(&Point::new(5.0, 5.0), &square));
/// assert!(point_in_polygon(&Point::new(0.0, 5.0), &square));
/// assert!(!point_in_polygon(&Point::new(15.0, 15.0), &square));
/// # Ok(())
/// # }
/// ```
pub fn point_in_polygon(point: &Point, polygon: &Polygon) -> bool {
    let bbox = polygon.bounding_box();
    if point.x < bbox.min_x - BOUNDARY_TOLERANCE
        || point.x > bbox.max_x + BOUNDARY_TOLERANCE
        || point.y < bbox.min_y - BOUNDARY_TOLERANCE
        || point.y > bbox.max_y + BOUNDARY_TOLERANCE
    {
        return false;
    }

    if point_on_boundary(point, polygon) {
        return true;
    }

    winding_number(point, polygon) != 0
}

fn winding_number(point: &Point, polygon: &Polygon) -> i32 {
    let mut winding = 0;
    for (a, b) in polygon.edges() {
        if a.y <= point.y {
            // Upward crossing with the point strictly left of the edge.
            if b.y > point.y && orientation(&a, &b, point) > 0.0 {
                winding += 1;
            }
        } else if b.y <= point.y && orientation(&a, &b, point) < 0.0 {
            winding -= 1;
        }
    }
    winding
}

/// Polygon intersection: any pair of edges touches or crosses, or one
/// polygon lies entirely inside the other.
///
/// Full containment counts as intersecting.
pub fn polygons_intersect(a: &Polygon, b: &Polygon) -> bool {
    if !a.bounding_box().intersects(&b.bounding_box()) {
        return false;
    }

    for (p1, p2) in a.edges() {
        for (q1, q2) in b.edges() {
            if segments_intersect(&p1, &p2, &q1, &q2) {
                return true;
            }
        }
    }

    // No edge contact: either disjoint or one ring nests inside the other.
    point_in_polygon(&a.vertices()[0], b) || point_in_polygon(&b.vertices()[0], a)
}

/// Check whether two points are within `radius_meters` of each other
/// (haversine, inclusive).
pub fn within_radius(a: &Point, b: &Point, radius_meters: f64) -> bool {
    a.distance_to(b) <= radius_meters
}
