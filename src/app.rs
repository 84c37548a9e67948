//! HTTP router and request handlers.

use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::error::FluxError;
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models::{RoiQuery, TQuery, XyQuery};
use crate::responses::{
    GeometryCollectionResponse, MultiPointResponse, PointGeometry, QueryResponse, ScenarioSummary,
};
use crate::scenario::{ScenarioMetadata, SummaryStats};
use crate::store::FluxStore;
use crate::validated_query::ValidatedQuery;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

/// `Service` type returned by [service] and served by [crate::server::serve].
pub type Service = NormalizePath<Router>;

/// Initialise state shared by all requests.
pub async fn init(
    args: &CommandLineArgs,
    store: Arc<dyn FluxStore>,
) -> Result<SharedAppState, FluxError> {
    Ok(Arc::new(AppState::new(args, store).await?))
}

/// Returns a [axum::Router] for the fluxvis API
fn router(state: SharedAppState) -> Router {
    fn scenarios() -> Router<SharedAppState> {
        Router::new()
            .route("/scenarios.json", get(list_scenarios))
            .route("/scenarios/:scenario", get(scenario_metadata))
            .route("/scenarios/:scenario/t.json", get(time_series))
            .route("/scenarios/:scenario/roi.json", get(region_of_interest))
            .route("/scenarios/:scenario/xy.json", get(map))
            .route("/scenarios/:scenario/geometry.json", get(geometry))
            .route("/scenarios/:scenario/grid.json", get(grid))
            .route("/scenarios/:scenario/stats.json", get(stats))
    }

    Router::new()
        .nest("/flux/api", scenarios())
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(request_counter)
                    .on_response(record_response_metrics),
            ),
        )
        .with_state(state)
}

/// Returns a [Service] for the fluxvis API
///
/// The service is populated with all routes as well as the following middleware:
///
/// * a [tower_http::trace::TraceLayer] for tracing requests and responses
/// * a [tower_http::normalize_path::NormalizePathLayer] for trimming trailing slashes from
///   requests
pub fn service(state: SharedAppState) -> Service {
    // Note that any middleware that should affect routing must wrap the router.
    // See https://docs.rs/axum/0.6.12/axum/middleware/index.html#rewriting-request-uri-in-middleware
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

async fn list_scenarios(State(state): State<SharedAppState>) -> Json<Vec<ScenarioSummary>> {
    Json(
        state
            .registry
            .iter()
            .map(|scenario| ScenarioSummary {
                id: scenario.id().to_string(),
                title: scenario.metadata.title.clone(),
                gridded: scenario.gridded(),
            })
            .collect(),
    )
}

/// Full metadata document. The route also matches `{scenario}.json`.
async fn scenario_metadata(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
) -> Result<Json<ScenarioMetadata>, FluxError> {
    let id = scenario.strip_suffix(".json").unwrap_or(&scenario);
    let scenario = state.registry.get(id)?;
    Ok(Json(scenario.metadata.clone()))
}

async fn time_series(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
    ValidatedQuery(query): ValidatedQuery<TQuery>,
) -> Result<QueryResponse, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    let request = query.resolve()?;
    state
        .query_context()
        .time_series(&scenario, request)
        .await
}

async fn region_of_interest(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
    ValidatedQuery(query): ValidatedQuery<RoiQuery>,
) -> Result<QueryResponse, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    let request = query.resolve()?;
    state
        .query_context()
        .time_series(&scenario, request)
        .await
}

async fn map(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
    ValidatedQuery(query): ValidatedQuery<XyQuery>,
) -> Result<QueryResponse, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    let request = query.resolve()?;
    state.query_context().map(&scenario, request).await
}

async fn geometry(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
) -> Result<Json<GeometryCollectionResponse>, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    Ok(Json(GeometryCollectionResponse {
        kind: "GeometryCollection",
        id: scenario.id().to_string(),
        geometries: scenario
            .cell_index
            .cells()
            .iter()
            .map(|coordinates| PointGeometry::new(*coordinates))
            .collect(),
    }))
}

async fn grid(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
) -> Result<Json<MultiPointResponse>, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    Ok(Json(MultiPointResponse {
        kind: "MultiPoint",
        id: scenario.id().to_string(),
        coordinates: scenario.cell_index.cells().to_vec(),
    }))
}

async fn stats(
    State(state): State<SharedAppState>,
    Path(scenario): Path<String>,
) -> Result<Json<SummaryStats>, FluxError> {
    let scenario = state.registry.get(&scenario)?;
    scenario
        .metadata
        .stats
        .clone()
        .map(Json)
        .ok_or_else(|| FluxError::NoSummaryStats(scenario.id().to_string()))
}
