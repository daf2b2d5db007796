//! WGS84 geometry primitives.
//!
//! Geometries serialize as GeoJSON geometry objects (`{"type": "Point",
//! "coordinates": [lon, lat]}`). Distances are great-circle distances on a
//! spherical earth; intersection tests treat longitude/latitude as planar
//! coordinates, which holds for regions that do not cross the antimeridian.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("coordinate ({lon}, {lat}) is outside WGS84 bounds")]
    InvalidCoordinate { lon: f64, lat: f64 },

    #[error("ring {0} needs at least 4 positions")]
    TooFewPositions(usize),

    #[error("ring {0} is not closed")]
    NotClosed(usize),

    #[error("ring {0} has zero area")]
    Degenerate(usize),

    #[error("ring {0} intersects itself")]
    SelfIntersecting(usize),

    #[error("interior ring {0} crosses the exterior ring")]
    RingsCross(usize),

    #[error("interior ring {0} lies outside the exterior ring")]
    HoleOutside(usize),

    #[error("polygon has no rings")]
    Empty,

    #[error("line needs at least 2 positions")]
    LineTooShort,
}

/// A longitude/latitude position, serialized as a GeoJSON `[lon, lat]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GeometryError::InvalidCoordinate {
                lon: self.lon,
                lat: self.lat,
            })
        }
    }

    /// Great-circle distance in meters.
    pub fn haversine_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([lon, lat]: [f64; 2]) -> Self {
        Self { lon, lat }
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        [point.lon, point.lat]
    }
}

/// A polygon: exterior ring first, then holes. Rings are closed.
///
/// Deserialization does not validate; call [`Polygon::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    pub rings: Vec<Vec<GeoPoint>>,
}

impl Polygon {
    pub fn new(exterior: Vec<GeoPoint>) -> Self {
        Self {
            rings: vec![exterior],
        }
    }

    pub fn with_hole(mut self, hole: Vec<GeoPoint>) -> Self {
        self.rings.push(hole);
        self
    }

    pub fn exterior(&self) -> &[GeoPoint] {
        self.rings.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn interiors(&self) -> &[Vec<GeoPoint>] {
        self.rings.get(1..).unwrap_or(&[])
    }

    /// Checks that every ring is closed, non-degenerate and simple, and that
    /// holes sit inside the exterior without crossing it.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.rings.is_empty() {
            return Err(GeometryError::Empty);
        }
        for (index, ring) in self.rings.iter().enumerate() {
            if ring.len() < 4 {
                return Err(GeometryError::TooFewPositions(index));
            }
            for point in ring {
                point.validate()?;
            }
            if ring.first() != ring.last() {
                return Err(GeometryError::NotClosed(index));
            }
            if signed_area(ring).abs() < EPSILON {
                return Err(GeometryError::Degenerate(index));
            }
            if ring_self_intersects(ring) {
                return Err(GeometryError::SelfIntersecting(index));
            }
        }
        let exterior = self.exterior();
        for (index, hole) in self.interiors().iter().enumerate() {
            if rings_cross(exterior, hole) {
                return Err(GeometryError::RingsCross(index + 1));
            }
            if !hole.iter().all(|p| ring_contains(exterior, p)) {
                return Err(GeometryError::HoleOutside(index + 1));
            }
        }
        Ok(())
    }

    /// Area centroid of the exterior ring, falling back to the vertex mean for
    /// degenerate rings.
    pub fn centroid(&self) -> GeoPoint {
        let ring = self.exterior();
        let area = signed_area(ring);
        if area.abs() < EPSILON {
            let open = ring.len().saturating_sub(1).max(1);
            return vertex_mean(&ring[..open.min(ring.len())]);
        }
        // Work relative to the first vertex to keep the products small.
        let origin = ring[0];
        let mut cx = 0.0;
        let mut cy = 0.0;
        for pair in ring.windows(2) {
            let (ax, ay) = (pair[0].lon - origin.lon, pair[0].lat - origin.lat);
            let (bx, by) = (pair[1].lon - origin.lon, pair[1].lat - origin.lat);
            let cross = ax * by - bx * ay;
            cx += (ax + bx) * cross;
            cy += (ay + by) * cross;
        }
        GeoPoint::new(
            origin.lon + cx / (6.0 * area),
            origin.lat + cy / (6.0 * area),
        )
    }

    /// True when `point` lies inside or on the boundary, and not strictly
    /// inside a hole.
    pub fn contains_point(&self, point: &GeoPoint) -> bool {
        if !ring_contains(self.exterior(), point) {
            return false;
        }
        !self
            .interiors()
            .iter()
            .any(|hole| ring_contains(hole, point) && !on_ring_boundary(hole, point))
    }

    fn edges(&self) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
        self.rings
            .iter()
            .flat_map(|ring| ring.windows(2).map(|pair| (pair[0], pair[1])))
    }

    fn intersects_polygon(&self, other: &Polygon) -> bool {
        if other.exterior().iter().any(|p| self.contains_point(p))
            || self.exterior().iter().any(|p| other.contains_point(p))
        {
            return true;
        }
        self.edges()
            .any(|(a, b)| other.edges().any(|(c, d)| segments_intersect(a, b, c, d)))
    }

    fn intersects_line(&self, line: &[GeoPoint]) -> bool {
        if line.iter().any(|p| self.contains_point(p)) {
            return true;
        }
        line.windows(2).any(|pair| {
            self.edges()
                .any(|(c, d)| segments_intersect(pair[0], pair[1], c, d))
        })
    }

    fn write_wkt_rings(&self, out: &mut String) {
        out.push('(');
        for (i, ring) in self.rings.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_wkt_positions(out, ring);
        }
        out.push(')');
    }
}

/// A document or region geometry in GeoJSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(GeoPoint),
    LineString(Vec<GeoPoint>),
    Polygon(Polygon),
}

impl Geometry {
    pub fn point(lon: f64, lat: f64) -> Self {
        Self::Point(GeoPoint::new(lon, lat))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::LineString(_) => "LineString",
            Self::Polygon(_) => "Polygon",
        }
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::Point(point) => point.validate(),
            Self::LineString(line) => {
                if line.len() < 2 {
                    return Err(GeometryError::LineTooShort);
                }
                line.iter().try_for_each(GeoPoint::validate)
            }
            Self::Polygon(polygon) => polygon.validate(),
        }
    }

    /// The point used for distance measurements and radius filtering.
    pub fn representative_point(&self) -> GeoPoint {
        match self {
            Self::Point(point) => *point,
            Self::LineString(line) => vertex_mean(line),
            Self::Polygon(polygon) => polygon.centroid(),
        }
    }

    pub fn intersects(&self, region: &Polygon) -> bool {
        match self {
            Self::Point(point) => region.contains_point(point),
            Self::LineString(line) => region.intersects_line(line),
            Self::Polygon(polygon) => region.intersects_polygon(polygon),
        }
    }

    /// Well-known-text rendering, used when describing locations in prompts.
    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Point(p) => {
                let _ = write!(out, "POINT({} {})", p.lon, p.lat);
            }
            Self::LineString(line) => {
                out.push_str("LINESTRING");
                write_wkt_positions(&mut out, line);
            }
            Self::Polygon(polygon) => {
                out.push_str("POLYGON");
                polygon.write_wkt_rings(&mut out);
            }
        }
        out
    }
}

fn write_wkt_positions(out: &mut String, positions: &[GeoPoint]) {
    out.push('(');
    for (i, p) in positions.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{} {}", p.lon, p.lat);
    }
    out.push(')');
}

fn vertex_mean(points: &[GeoPoint]) -> GeoPoint {
    if points.is_empty() {
        return GeoPoint::new(0.0, 0.0);
    }
    let n = points.len() as f64;
    let (lon, lat) = points
        .iter()
        .fold((0.0, 0.0), |(lon, lat), p| (lon + p.lon, lat + p.lat));
    GeoPoint::new(lon / n, lat / n)
}

/// Shoelace area over a closed ring, in squared degrees.
fn signed_area(ring: &[GeoPoint]) -> f64 {
    let Some(origin) = ring.first() else {
        return 0.0;
    };
    ring.windows(2)
        .map(|pair| {
            let (ax, ay) = (pair[0].lon - origin.lon, pair[0].lat - origin.lat);
            let (bx, by) = (pair[1].lon - origin.lon, pair[1].lat - origin.lat);
            ax * by - bx * ay
        })
        .sum::<f64>()
        / 2.0
}

fn orientation(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: GeoPoint, b: GeoPoint, p: GeoPoint) -> bool {
    orientation(a, b, p).abs() < EPSILON
        && p.lon >= a.lon.min(b.lon) - EPSILON
        && p.lon <= a.lon.max(b.lon) + EPSILON
        && p.lat >= a.lat.min(b.lat) - EPSILON
        && p.lat <= a.lat.max(b.lat) + EPSILON
}

fn segments_intersect(a: GeoPoint, b: GeoPoint, c: GeoPoint, d: GeoPoint) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

fn on_ring_boundary(ring: &[GeoPoint], point: &GeoPoint) -> bool {
    ring.windows(2).any(|pair| on_segment(pair[0], pair[1], *point))
}

/// Ray casting; points on the boundary count as inside.
fn ring_contains(ring: &[GeoPoint], point: &GeoPoint) -> bool {
    if on_ring_boundary(ring, point) {
        return true;
    }
    let mut inside = false;
    for pair in ring.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let crossing = a.lon + (point.lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon);
            if point.lon < crossing {
                inside = !inside;
            }
        }
    }
    inside
}

fn ring_self_intersects(ring: &[GeoPoint]) -> bool {
    let edges: Vec<(GeoPoint, GeoPoint)> = ring.windows(2).map(|p| (p[0], p[1])).collect();
    let n = edges.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            let (a, b) = edges[i];
            let (c, d) = edges[j];
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

fn rings_cross(outer: &[GeoPoint], inner: &[GeoPoint]) -> bool {
    outer.windows(2).any(|e| {
        inner
            .windows(2)
            .any(|f| segments_intersect(e[0], e[1], f[0], f[1]))
    })
}
