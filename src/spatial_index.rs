//! Spatial lookup of model grid cells.
//!
//! A scenario's [CellIndex] is the ordered list of grid cell centroids. The position of a cell in
//! the list is its identity everywhere else: value arrays in gridded time slices are laid out in
//! the same order.

use crate::error::FluxError;
use crate::geometry::GeometryPolygon;

use geo::{BoundingRect, Intersects, Point};
use serde::{Deserialize, Serialize};

/// Ordered `[lon, lat]` centroids of the cells of a scenario grid.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CellIndex(Vec<[f64; 2]>);

impl CellIndex {
    pub fn new(cells: Vec<[f64; 2]>) -> Self {
        Self(cells)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<[f64; 2]> {
        self.0.get(index).copied()
    }

    pub fn cells(&self) -> &[[f64; 2]] {
        &self.0
    }

    /// Returns the position of the first cell located exactly at `(lon, lat)`.
    ///
    /// This is a linear scan with exact float comparison; there is no snapping to the nearest
    /// cell. Grids are in the low thousands of cells so this has not been worth indexing.
    pub fn position(&self, lon: f64, lat: f64) -> Option<usize> {
        self.0
            .iter()
            .position(|[x, y]| *x == lon && *y == lat)
    }
}

/// Point geometry for every cell of a scenario, used to answer polygon queries.
#[derive(Debug)]
pub struct GeometryCollection {
    points: Vec<(usize, Point<f64>)>,
}

impl GeometryCollection {
    /// Build the collection from a cell index.
    ///
    /// Fails without returning a partial collection if any cell cannot be represented as a point.
    pub fn build(cells: &CellIndex) -> Result<Self, FluxError> {
        let points = cells
            .cells()
            .iter()
            .enumerate()
            .map(|(index, [lon, lat])| {
                if lon.is_finite() && lat.is_finite() {
                    Ok((index, Point::new(*lon, *lat)))
                } else {
                    Err(FluxError::InvalidCell { index })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the indices, in ascending order, of cells whose point intersects the polygon.
    ///
    /// Points on the polygon boundary are included.
    pub fn cells_intersecting(&self, polygon: &GeometryPolygon) -> Vec<usize> {
        let polygon = polygon.to_geo();
        let Some(bounds) = polygon.bounding_rect() else {
            return vec![];
        };
        let (min, max) = (bounds.min(), bounds.max());
        self.points
            .iter()
            .filter(|(_, point)| {
                point.x() >= min.x && point.x() <= max.x && point.y() >= min.y && point.y() <= max.y
            })
            .filter(|(_, point)| polygon.intersects(point))
            .map(|(index, _)| *index)
            .collect()
    }
}

/// Returns true if a free-standing observation at `coordinates` lies in or on the polygon.
pub fn point_intersects(polygon: &geo::Polygon<f64>, coordinates: [f64; 2]) -> bool {
    polygon.intersects(&Point::new(coordinates[0], coordinates[1]))
}
