//! WKT geometry parsing.
//!
//! Only the two literals used by the query API are understood:
//!
//! * `POINT(lon lat)`
//! * `POLYGON((lon lat, lon lat, ...))` with a single ring
//!
//! Coordinate components may be separated by whitespace or by `+`, which is how a space arrives
//! when a client forgets to URL-encode it.

use crate::error::FluxError;

use geo::{LineString, Polygon};
use serde::Serialize;

/// A `(longitude, latitude)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(into = "[f64; 2]")]
pub struct GeometryPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeometryPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<GeometryPoint> for [f64; 2] {
    fn from(point: GeometryPoint) -> Self {
        [point.lon, point.lat]
    }
}

/// A single polygon ring with consecutive duplicate vertices removed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeometryPolygon {
    ring: Vec<[f64; 2]>,
}

impl GeometryPolygon {
    /// The vertices of the ring, as parsed.
    pub fn ring(&self) -> &[[f64; 2]] {
        &self.ring
    }

    /// Returns a [geo::Polygon] for intersection tests. The ring is closed implicitly.
    pub fn to_geo(&self) -> Polygon<f64> {
        let exterior: LineString<f64> = self
            .ring
            .iter()
            .map(|[lon, lat]| (*lon, *lat))
            .collect::<Vec<_>>()
            .into();
        Polygon::new(exterior, vec![])
    }
}

fn invalid(wkt: &str, reason: impl Into<String>) -> FluxError {
    FluxError::InvalidGeometry {
        wkt: wkt.to_string(),
        reason: reason.into(),
    }
}

/// Strip a `KEYWORD(...)` wrapper, returning the text between the outermost parentheses.
///
/// Multi-part geometry keywords are rejected with [FluxError::UnsupportedGeometry] so that a
/// caller never gets back part of their input.
fn strip_wrapper<'a>(wkt: &'a str, keyword: &str) -> Result<&'a str, FluxError> {
    let trimmed = wkt.trim();
    let upper = trimmed.to_ascii_uppercase();
    for multi in ["MULTIPOLYGON", "MULTIPOINT", "GEOMETRYCOLLECTION"] {
        if upper.starts_with(multi) {
            return Err(FluxError::UnsupportedGeometry {
                kind: multi.to_string(),
            });
        }
    }
    if !upper.starts_with(keyword) {
        return Err(invalid(wkt, format!("expected {keyword}")));
    }
    let body = trimmed[keyword.len()..].trim_start();
    body.strip_prefix('(')
        .and_then(|body| body.strip_suffix(')'))
        .ok_or_else(|| invalid(wkt, "unbalanced parentheses"))
}

/// Parse `lon lat` (or `lon+lat`) into a pair of numbers.
fn parse_pair(wkt: &str, pair: &str) -> Result<[f64; 2], FluxError> {
    let parts: Vec<&str> = pair
        .split(|c: char| c.is_whitespace() || c == '+')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(invalid(wkt, format!("expected 'lon lat', got '{}'", pair.trim())));
    }
    let mut coords = [0.0; 2];
    for (coord, part) in coords.iter_mut().zip(parts) {
        *coord = part
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| invalid(wkt, format!("non-numeric coordinate '{part}'")))?;
    }
    Ok(coords)
}

/// Parse a WKT `POINT(lon lat)` literal.
pub fn parse_point(wkt: &str) -> Result<GeometryPoint, FluxError> {
    let body = strip_wrapper(wkt, "POINT")?;
    if body.contains(['(', ')', ',']) {
        return Err(invalid(wkt, "a point has exactly one coordinate pair"));
    }
    let [lon, lat] = parse_pair(wkt, body)?;
    Ok(GeometryPoint::new(lon, lat))
}

/// Parse a WKT `POLYGON((...))` literal with a single ring.
///
/// Adjacent duplicate vertices are removed; at least three distinct vertices must remain.
pub fn parse_polygon(wkt: &str) -> Result<GeometryPolygon, FluxError> {
    let body = strip_wrapper(wkt, "POLYGON")?.trim();
    let ring = body
        .strip_prefix('(')
        .and_then(|ring| ring.strip_suffix(')'))
        .ok_or_else(|| invalid(wkt, "missing ring parentheses"))?;
    if ring.contains(['(', ')']) {
        return Err(invalid(wkt, "only a single ring is supported"));
    }

    let mut vertices: Vec<[f64; 2]> = Vec::new();
    for pair in ring.split(',') {
        let vertex = parse_pair(wkt, pair)?;
        if vertices.last() != Some(&vertex) {
            vertices.push(vertex);
        }
    }

    let mut distinct = vertices.clone();
    if distinct.len() > 1 && distinct.first() == distinct.last() {
        distinct.pop();
    }
    if distinct.len() < 3 {
        return Err(invalid(wkt, "a polygon needs at least three distinct vertices"));
    }
    Ok(GeometryPolygon { ring: vertices })
}

/// Render a point as WKT such that [parse_point] returns exactly the same coordinates.
pub fn format_point(point: &GeometryPoint) -> String {
    format!("POINT({} {})", point.lon, point.lat)
}
