//! Query orchestration.
//!
//! A [QueryContext] executes a resolved request against one scenario: resolve geometry, fetch
//! the time window, aggregate and round. Every step returns early on failure so that a response
//! is either complete or an error.

use crate::binning::{bin_timestamps, pool_bins, reduce_bins, reduce_series, Bin, Interval};
use crate::error::FluxError;
use crate::geometry::{format_point, GeometryPoint};
use crate::models::{format_timestamp, RegionQuery, TRequest, TimeRange, XyRequest};
use crate::precision::{round, round_all};
use crate::reducers::{Aggregate, Stats};
use crate::resource_manager::ResourceManager;
use crate::responses::*;
use crate::scenario::Scenario;
use crate::spatial_index::point_intersects;
use crate::store::{FluxStore, GriddedSlice, PointSlice, Slices};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use tokio::sync::SemaphorePermit;

/// Values selected by a query, one entry per time step.
#[derive(Debug)]
enum StepValues {
    /// `steps x cells`
    Grid(Array2<f64>),
    /// Observation values of each distinct timestamp
    Points(Vec<Vec<f64>>),
}

/// The selected values of a spatiotemporal query.
#[derive(Debug)]
struct Selection {
    /// Ascending; distinct for gridded data and for grouped observations.
    timestamps: Vec<DateTime<Utc>>,
    values: StepValues,
}

impl Selection {
    /// Reduce each step over space.
    fn spatial(&self, aggregate: Aggregate) -> Result<Vec<f64>, FluxError> {
        match &self.values {
            StepValues::Grid(matrix) => aggregate.reduce_rows(matrix.view()),
            StepValues::Points(groups) => groups
                .iter()
                .map(|group| aggregate.reduce(Array1::from_vec(group.clone()).view()))
                .collect(),
        }
    }

    /// Values of each bin. Gridded cells are averaged within a bin; observations are pooled.
    fn binned(&self, bins: &[Bin]) -> Result<Vec<Vec<f64>>, FluxError> {
        match &self.values {
            StepValues::Grid(matrix) => Ok(reduce_bins(matrix.view(), bins, None)?
                .axis_iter(Axis(0))
                .map(|row| row.to_vec())
                .collect()),
            StepValues::Points(groups) => Ok(pool_bins(groups, bins)),
        }
    }

    /// Every selected value, flattened.
    fn all(&self) -> Vec<f64> {
        match &self.values {
            StepValues::Grid(matrix) => matrix.iter().copied().collect(),
            StepValues::Points(groups) => groups.iter().flatten().copied().collect(),
        }
    }
}

fn bin_starts(bins: &[Bin]) -> Vec<String> {
    bins.iter().map(|bin| format_timestamp(bin.start)).collect()
}

/// Check that every gridded slice has one value per cell.
fn check_slices(slices: &[GriddedSlice], cells: usize) -> Result<(), FluxError> {
    match slices.iter().find(|slice| slice.values.len() != cells) {
        Some(slice) => Err(FluxError::InconsistentSlice {
            timestamp: format_timestamp(slice.timestamp),
            actual: slice.values.len(),
            expected: cells,
        }),
        None => Ok(()),
    }
}

/// Build a `steps x cells` matrix of the selected cells.
fn gridded_matrix(slices: &[GriddedSlice], cells: &[usize]) -> Result<Array2<f64>, FluxError> {
    let mut data = Vec::with_capacity(slices.len() * cells.len());
    for slice in slices {
        data.extend(cells.iter().map(|cell| slice.values[*cell]));
    }
    Ok(Array2::from_shape_vec((slices.len(), cells.len()), data)?)
}

/// Group ascending observations by timestamp.
fn group_points<'s, I>(points: I) -> (Vec<DateTime<Utc>>, Vec<Vec<f64>>)
where
    I: IntoIterator<Item = &'s PointSlice>,
{
    let mut timestamps: Vec<DateTime<Utc>> = vec![];
    let mut groups: Vec<Vec<f64>> = vec![];
    for point in points {
        match (timestamps.last(), groups.last_mut()) {
            (Some(last), Some(group)) if *last == point.timestamp => {
                group.push(point.properties.value)
            }
            _ => {
                timestamps.push(point.timestamp);
                groups.push(vec![point.properties.value]);
            }
        }
    }
    (timestamps, groups)
}

fn bytes_of(values: usize) -> usize {
    values.saturating_mul(std::mem::size_of::<f64>())
}

fn not_gridded(operation: &str) -> FluxError {
    FluxError::NotImplemented {
        operation: format!("{operation} of non-gridded scenario"),
    }
}

fn gridded_only(operation: &str) -> FluxError {
    FluxError::NotImplemented {
        operation: format!("{operation} of gridded scenario"),
    }
}

/// Executes requests against the store, within the server's resource limits.
pub struct QueryContext<'a> {
    pub store: &'a dyn FluxStore,
    pub resource_manager: &'a ResourceManager,
    /// Run aggregations on the rayon thread pool.
    pub use_rayon: bool,
}

impl<'a> QueryContext<'a> {
    /// Run a CPU-bound aggregation.
    async fn compute<F, R>(&self, f: F) -> Result<R, FluxError>
    where
        F: FnOnce() -> Result<R, FluxError> + Send + 'static,
        R: Send + 'static,
    {
        if self.use_rayon {
            tokio_rayon::spawn(f).await
        } else {
            let _task_permit = self.resource_manager.task().await?;
            f()
        }
    }

    async fn fetch_gridded(
        &self,
        scenario: &Scenario,
        range: &TimeRange,
    ) -> Result<Vec<GriddedSlice>, FluxError> {
        let slices = self
            .store
            .find_by_time_range(&scenario.metadata, range.start, range.end)
            .await?;
        tracing::debug!("Fetched {} slices of {}", slices.len(), scenario.id());
        match slices {
            Slices::Gridded(slices) if !slices.is_empty() => {
                check_slices(&slices, scenario.cell_index.len())?;
                Ok(slices)
            }
            _ => Err(FluxError::NoData),
        }
    }

    async fn fetch_points(
        &self,
        scenario: &Scenario,
        range: &TimeRange,
    ) -> Result<Vec<PointSlice>, FluxError> {
        let slices = self
            .store
            .find_by_time_range(&scenario.metadata, range.start, range.end)
            .await?;
        tracing::debug!("Fetched {} observations of {}", slices.len(), scenario.id());
        match slices {
            Slices::Point(slices) if !slices.is_empty() => Ok(slices),
            _ => Err(FluxError::NoData),
        }
    }

    /// Cells of a gridded scenario intersecting a region.
    async fn region_cells(
        &self,
        scenario: &Scenario,
        region: &RegionQuery,
    ) -> Result<Vec<usize>, FluxError> {
        let geometry = scenario.geometry(self.store).await?;
        let cells = geometry.cells_intersecting(&region.polygon);
        if cells.is_empty() {
            return Err(FluxError::NoIntersectingCells);
        }
        Ok(cells)
    }

    /// Select the values of a region, or of the whole domain, within a window.
    ///
    /// The returned permit accounts for the memory of the selection and must be held until
    /// aggregation completes.
    async fn select(
        &self,
        scenario: &Scenario,
        region: Option<&RegionQuery>,
        range: &TimeRange,
    ) -> Result<(Selection, Option<SemaphorePermit<'a>>), FluxError> {
        let resource_manager = self.resource_manager;
        if scenario.gridded() {
            let cells = match region {
                Some(region) => self.region_cells(scenario, region).await?,
                None => (0..scenario.cell_index.len()).collect(),
            };
            let slices = self.fetch_gridded(scenario, range).await?;
            let permit = resource_manager
                .memory(bytes_of(slices.len().saturating_mul(cells.len())))
                .await?;
            let matrix = gridded_matrix(&slices, &cells)?;
            let timestamps = slices.iter().map(|slice| slice.timestamp).collect();
            let selection = Selection {
                timestamps,
                values: StepValues::Grid(matrix),
            };
            Ok((selection, permit))
        } else {
            let points = self.fetch_points(scenario, range).await?;
            let (timestamps, groups) = match region {
                Some(region) => {
                    let polygon = region.polygon.to_geo();
                    let inside: Vec<&PointSlice> = points
                        .iter()
                        .filter(|point| point_intersects(&polygon, point.coordinates))
                        .collect();
                    if inside.is_empty() {
                        return Err(FluxError::NoIntersectingCells);
                    }
                    group_points(inside)
                }
                None => group_points(&points),
            };
            let permit = resource_manager
                .memory(bytes_of(groups.iter().map(Vec::len).sum()))
                .await?;
            let selection = Selection {
                timestamps,
                values: StepValues::Points(groups),
            };
            Ok((selection, permit))
        }
    }

    /// Execute a request of the time series endpoints.
    pub async fn time_series(
        &self,
        scenario: &Scenario,
        request: TRequest,
    ) -> Result<QueryResponse, FluxError> {
        match request {
            TRequest::PointSeries { point, range } => {
                self.point_series(scenario, point, range).await
            }
            TRequest::PointAggregate {
                point,
                range,
                aggregate,
                interval,
            } => {
                self.point_aggregate(scenario, point, range, aggregate, interval)
                    .await
            }
            TRequest::RegionStats {
                region,
                range,
                interval,
            } => self.region_stats(scenario, region, range, interval).await,
            TRequest::RegionAggregate {
                region,
                range,
                aggregate,
                interval,
            } => {
                self.space_time_aggregate(scenario, Some(region), range, aggregate, interval)
                    .await
            }
            TRequest::DomainAggregate {
                range,
                aggregate,
                interval,
            } => {
                self.space_time_aggregate(scenario, None, range, aggregate, interval)
                    .await
            }
        }
    }

    fn cell_of(scenario: &Scenario, point: GeometryPoint) -> Result<usize, FluxError> {
        scenario
            .cell_index
            .position(point.lon, point.lat)
            .ok_or(FluxError::CellNotFound {
                lon: point.lon,
                lat: point.lat,
            })
    }

    async fn point_series(
        &self,
        scenario: &Scenario,
        point: GeometryPoint,
        range: TimeRange,
    ) -> Result<QueryResponse, FluxError> {
        if !scenario.gridded() {
            return Err(not_gridded("point time series"));
        }
        let cell = Self::cell_of(scenario, point)?;
        let slices = self.fetch_gridded(scenario, &range).await?;
        let series = round_all(slices.iter().map(|slice| slice.values[cell]), scenario.precision);
        Ok(QueryResponse::PointSeries(PointSeriesResponse {
            series,
            properties: PointSeriesProperties {
                start: range.start_param,
                end: range.end_param,
                coords: point.into(),
            },
        }))
    }

    async fn point_aggregate(
        &self,
        scenario: &Scenario,
        point: GeometryPoint,
        range: TimeRange,
        aggregate: Aggregate,
        interval: Interval,
    ) -> Result<QueryResponse, FluxError> {
        if !scenario.gridded() {
            return Err(not_gridded("point aggregate"));
        }
        let cell = Self::cell_of(scenario, point)?;
        let slices = self.fetch_gridded(scenario, &range).await?;
        let timestamps: Vec<_> = slices.iter().map(|slice| slice.timestamp).collect();
        let values: Vec<f64> = slices.iter().map(|slice| slice.values[cell]).collect();
        let bins = bin_timestamps(&timestamps, Some(interval));
        let series = reduce_series(&values, &bins, Some(aggregate))?;
        Ok(QueryResponse::AggregateSeries(AggregateSeriesResponse {
            series: round_all(series, scenario.precision),
            series_t: None,
            properties: AggregateProperties {
                aggregate,
                interval: Some(interval),
                start: range.start_param,
                end: range.end_param,
                coords: Some(format_point(&point)),
                geom: None,
            },
        }))
    }

    /// Reduce over space at each step, then over time within each bin.
    async fn space_time_aggregate(
        &self,
        scenario: &Scenario,
        region: Option<RegionQuery>,
        range: TimeRange,
        aggregate: Aggregate,
        interval: Option<Interval>,
    ) -> Result<QueryResponse, FluxError> {
        let (selection, _memory_permit) = self.select(scenario, region.as_ref(), &range).await?;
        let precision = scenario.precision;
        let (series, series_t) = self
            .compute(move || {
                let spatial = selection.spatial(aggregate)?;
                let bins = bin_timestamps(&selection.timestamps, interval);
                let temporal = reduce_series(&spatial, &bins, Some(aggregate))?;
                Ok((round_all(temporal, precision), bin_starts(&bins)))
            })
            .await?;
        Ok(QueryResponse::AggregateSeries(AggregateSeriesResponse {
            series,
            series_t: Some(series_t),
            properties: AggregateProperties {
                aggregate,
                interval,
                start: range.start_param,
                end: range.end_param,
                coords: None,
                geom: region.map(|region| region.wkt),
            },
        }))
    }

    async fn region_stats(
        &self,
        scenario: &Scenario,
        region: RegionQuery,
        range: TimeRange,
        interval: Option<Interval>,
    ) -> Result<QueryResponse, FluxError> {
        let (selection, _memory_permit) = self.select(scenario, Some(&region), &range).await?;
        let precision = scenario.precision;
        let geom = vec![region.polygon.ring().to_vec()];
        self.compute(move || {
            let bins = bin_timestamps(&selection.timestamps, interval);
            let mut response = RegionStatsResponse {
                series_mean: vec![],
                series_min: vec![],
                series_max: vec![],
                series_std: vec![],
                series_n: vec![],
                series_t: bin_starts(&bins),
                properties: RegionStatsProperties {
                    start: range.start_param,
                    end: range.end_param,
                    geom,
                    interval,
                    all_mean: f64::NAN,
                    all_max: f64::NAN,
                    all_min: f64::NAN,
                    all_std: f64::NAN,
                    all_n: 0,
                },
            };
            for values in selection.binned(&bins)? {
                let stats = Stats::of_slice(&values)?;
                response.series_mean.push(round(stats.mean, precision));
                response.series_min.push(round(stats.min, precision));
                response.series_max.push(round(stats.max, precision));
                response.series_std.push(round(stats.std, precision));
                response.series_n.push(stats.n);
            }
            let all = Stats::of_slice(&selection.all())?;
            let properties = &mut response.properties;
            properties.all_mean = round(all.mean, precision);
            properties.all_max = round(all.max, precision);
            properties.all_min = round(all.min, precision);
            properties.all_std = round(all.std, precision);
            properties.all_n = all.n;
            Ok(QueryResponse::RegionStats(response))
        })
        .await
    }

    /// Execute a request of the map endpoint.
    pub async fn map(
        &self,
        scenario: &Scenario,
        request: XyRequest,
    ) -> Result<QueryResponse, FluxError> {
        match request {
            XyRequest::Snapshot { time, verbose } => self.snapshot(scenario, time, verbose).await,
            XyRequest::MapAggregate {
                range,
                aggregate,
                verbose,
            } => self.map_aggregate(scenario, range, aggregate, verbose).await,
            XyRequest::PointFeatures { range, verbose } => {
                if scenario.gridded() {
                    return Err(gridded_only("observations in a window"));
                }
                let points = self.fetch_points(scenario, &range).await?;
                Ok(observations(scenario, None, &points, verbose))
            }
        }
    }

    async fn snapshot(
        &self,
        scenario: &Scenario,
        time: DateTime<Utc>,
        verbose: bool,
    ) -> Result<QueryResponse, FluxError> {
        let timestamp = format_timestamp(time);
        match self
            .store
            .find_by_exact_time(&scenario.metadata, time)
            .await?
        {
            Slices::Gridded(slices) => {
                let slice = slices.first().ok_or(FluxError::NoData)?;
                check_slices(std::slice::from_ref(slice), scenario.cell_index.len())?;
                let values = round_all(slice.values.iter().copied(), scenario.precision);
                if verbose {
                    Ok(QueryResponse::CellFeatures(CellFeatureCollection {
                        timestamp,
                        kind: "FeatureCollection",
                        features: cell_features(scenario, &values),
                    }))
                } else {
                    Ok(QueryResponse::Snapshot(SnapshotResponse {
                        timestamp,
                        features: values,
                        properties: SourceProperties {
                            source: scenario.id().to_string(),
                        },
                    }))
                }
            }
            Slices::Point(points) if !points.is_empty() => {
                Ok(observations(scenario, Some(timestamp), &points, verbose))
            }
            Slices::Point(_) => Err(FluxError::NoData),
        }
    }

    async fn map_aggregate(
        &self,
        scenario: &Scenario,
        range: TimeRange,
        aggregate: Aggregate,
        verbose: bool,
    ) -> Result<QueryResponse, FluxError> {
        if !scenario.gridded() {
            return Err(not_gridded("map aggregate"));
        }
        let (selection, _memory_permit) = self.select(scenario, None, &range).await?;
        let precision = scenario.precision;
        let values = self
            .compute(move || match &selection.values {
                StepValues::Grid(matrix) => Ok(round_all(
                    aggregate.reduce_columns(matrix.view())?,
                    precision,
                )),
                StepValues::Points(_) => Err(not_gridded("map aggregate")),
            })
            .await?;
        let features = if verbose {
            MapFeatures::Cells(cell_features(scenario, &values))
        } else {
            MapFeatures::Values(values)
        };
        Ok(QueryResponse::MapAggregate(MapAggregateResponse {
            timestamp: range.start_param.clone(),
            properties: MapAggregateProperties {
                start: range.start_param,
                end: range.end_param,
                aggregate,
            },
            features,
        }))
    }
}

/// Verbose map features, omitting missing cells.
fn cell_features(scenario: &Scenario, values: &[f64]) -> Vec<CellFeature> {
    scenario
        .cell_index
        .cells()
        .iter()
        .zip(values)
        .filter(|(_, value)| !value.is_nan())
        .map(|(coordinates, value)| CellFeature::new(*coordinates, *value))
        .collect()
}

fn observations(
    scenario: &Scenario,
    timestamp: Option<String>,
    points: &[PointSlice],
    verbose: bool,
) -> QueryResponse {
    let precision = scenario.precision;
    if verbose {
        QueryResponse::ObservationFeatures(ObservationFeatureCollection {
            timestamp,
            kind: "FeatureCollection",
            features: points
                .iter()
                .map(|point| ObservationFeature {
                    kind: "Feature",
                    properties: ObservationFeatureProperties {
                        timestamp: format_timestamp(point.timestamp),
                        source: scenario.id().to_string(),
                        value: round(point.properties.value, precision),
                    },
                    geometry: PointGeometry::new(point.coordinates),
                })
                .collect(),
        })
    } else {
        QueryResponse::Observations(ObservationsResponse {
            timestamp,
            features: points
                .iter()
                .map(|point| Observation {
                    timestamp: format_timestamp(point.timestamp),
                    coordinates: point.coordinates,
                    properties: ObservationValue {
                        value: round(point.properties.value, precision),
                    },
                })
                .collect(),
            properties: SourceProperties {
                source: scenario.id().to_string(),
            },
        })
    }
}
