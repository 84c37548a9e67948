//! Response bodies.
//!
//! Field names and nesting are part of the external API contract. Numbers are rounded before
//! they are placed in these types; missing values serialise as `null`.

use crate::binning::Interval;
use crate::reducers::Aggregate;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// `properties` of a single-cell time series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointSeriesProperties {
    pub start: String,
    pub end: String,
    pub coords: [f64; 2],
}

/// Raw time series of one cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointSeriesResponse {
    pub series: Vec<f64>,
    pub properties: PointSeriesProperties,
}

/// `properties` of aggregated time series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateProperties {
    pub aggregate: Aggregate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    pub start: String,
    pub end: String,
    /// WKT point, for point aggregates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<String>,
    /// WKT polygon, for region aggregates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom: Option<String>,
}

/// Aggregated time series, one value per bin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateSeriesResponse {
    pub series: Vec<f64>,
    /// Bin start timestamps; omitted for point aggregates.
    #[serde(rename = "seriesT", skip_serializing_if = "Option::is_none")]
    pub series_t: Option<Vec<String>>,
    pub properties: AggregateProperties,
}

/// `properties` of region statistics, including whole-selection statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionStatsProperties {
    pub start: String,
    pub end: String,
    /// Polygon coordinates, GeoJSON style
    pub geom: Vec<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    #[serde(rename = "allMean")]
    pub all_mean: f64,
    #[serde(rename = "allMax")]
    pub all_max: f64,
    #[serde(rename = "allMin")]
    pub all_min: f64,
    #[serde(rename = "allSTD")]
    pub all_std: f64,
    #[serde(rename = "allN")]
    pub all_n: usize,
}

/// Per-step (or per-bin) statistics of the cells of a region.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionStatsResponse {
    #[serde(rename = "seriesMean")]
    pub series_mean: Vec<f64>,
    #[serde(rename = "seriesMin")]
    pub series_min: Vec<f64>,
    #[serde(rename = "seriesMax")]
    pub series_max: Vec<f64>,
    #[serde(rename = "seriesSTD")]
    pub series_std: Vec<f64>,
    #[serde(rename = "seriesN")]
    pub series_n: Vec<usize>,
    #[serde(rename = "seriesT")]
    pub series_t: Vec<String>,
    pub properties: RegionStatsProperties,
}

/// `properties` naming the scenario a map came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceProperties {
    pub source: String,
}

/// Compact map: one value per cell, in cell index order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotResponse {
    pub timestamp: String,
    pub features: Vec<f64>,
    pub properties: SourceProperties,
}

/// `properties` of a verbose map feature.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueProperties {
    pub v: f64,
}

/// A cell of a verbose map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
    pub properties: ValueProperties,
}

impl CellFeature {
    pub fn new(coordinates: [f64; 2], v: f64) -> Self {
        Self {
            kind: "Point",
            coordinates,
            properties: ValueProperties { v },
        }
    }
}

/// Verbose map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellFeatureCollection {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<CellFeature>,
}

/// `properties` of a map aggregated over a window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapAggregateProperties {
    pub start: String,
    pub end: String,
    pub aggregate: Aggregate,
}

/// Map features, compact or verbose.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MapFeatures {
    Values(Vec<f64>),
    Cells(Vec<CellFeature>),
}

/// Map of every cell reduced over a window; `timestamp` is the window start.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapAggregateResponse {
    pub timestamp: String,
    pub properties: MapAggregateProperties,
    pub features: MapFeatures,
}

/// One free-form observation, as stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp: String,
    pub coordinates: [f64; 2],
    pub properties: ObservationValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationValue {
    pub value: f64,
}

/// Compact observations.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub features: Vec<Observation>,
    pub properties: SourceProperties,
}

/// GeoJSON point geometry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
}

impl PointGeometry {
    pub fn new(coordinates: [f64; 2]) -> Self {
        Self {
            kind: "Point",
            coordinates,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationFeatureProperties {
    pub timestamp: String,
    pub source: String,
    pub value: f64,
}

/// An observation as a GeoJSON feature.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: ObservationFeatureProperties,
    pub geometry: PointGeometry,
}

/// Verbose observations, a GeoJSON FeatureCollection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationFeatureCollection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<ObservationFeature>,
}

/// Entry of the scenario list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioSummary {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub gridded: bool,
}

/// Cell points of a scenario as a GeoJSON GeometryCollection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeometryCollectionResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "_id")]
    pub id: String,
    pub geometries: Vec<PointGeometry>,
}

/// Cell points of a scenario as a GeoJSON MultiPoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MultiPointResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "_id")]
    pub id: String,
    pub coordinates: Vec<[f64; 2]>,
}

/// Any body produced by the query endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    PointSeries(PointSeriesResponse),
    AggregateSeries(AggregateSeriesResponse),
    RegionStats(RegionStatsResponse),
    Snapshot(SnapshotResponse),
    CellFeatures(CellFeatureCollection),
    MapAggregate(MapAggregateResponse),
    Observations(ObservationsResponse),
    ObservationFeatures(ObservationFeatureCollection),
}

impl IntoResponse for QueryResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
