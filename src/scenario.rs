//! Scenario registry.
//!
//! Scenarios are loaded once at startup and are read-only afterwards, apart from the geometry
//! collection which is built on the first polygon query against a scenario.

use crate::error::FluxError;
use crate::metrics::GEOMETRY_BUILDS;
use crate::spatial_index::{CellIndex, GeometryCollection};
use crate::store::{FluxStore, ScenarioRecord};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Grid resolution of a gridded scenario.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GridResolution {
    pub units: String,
    pub x: f64,
    pub y: f64,
}

/// Pre-computed descriptive statistics of a scenario's whole dataset.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SummaryStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
}

/// Scenario metadata document.
///
/// Fields not modelled here are kept in `extra` so the metadata endpoint returns the document
/// as it was stored.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScenarioMetadata {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub gridded: bool,
    /// Decimal places of output values; falls back to the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gridres: Option<GridResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SummaryStats>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScenarioMetadata {
    /// Minimal metadata with only the required fields set.
    pub fn new(id: &str, gridded: bool) -> Self {
        Self {
            id: id.to_string(),
            title: None,
            gridded,
            precision: None,
            bbox: None,
            gridres: None,
            stats: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A registered scenario.
#[derive(Debug)]
pub struct Scenario {
    pub metadata: ScenarioMetadata,
    pub cell_index: CellIndex,
    /// Effective output precision.
    pub precision: u32,
    geometry: OnceCell<Arc<GeometryCollection>>,
}

impl Scenario {
    pub fn new(record: ScenarioRecord, default_precision: u32) -> Self {
        let precision = record.metadata.precision.unwrap_or(default_precision);
        Self {
            metadata: record.metadata,
            cell_index: record.cell_index,
            precision,
            geometry: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn gridded(&self) -> bool {
        self.metadata.gridded
    }

    /// Returns the geometry collection, building it on first use.
    ///
    /// Concurrent callers wait for a single in-flight build. A failed build caches nothing, so
    /// the next caller starts again from scratch.
    pub async fn geometry(
        &self,
        store: &dyn FluxStore,
    ) -> Result<Arc<GeometryCollection>, FluxError> {
        self.geometry
            .get_or_try_init(|| async {
                tracing::info!("Building geometry collection for scenario {}", self.id());
                GEOMETRY_BUILDS.inc();
                store
                    .build_geometry_collection(&self.metadata, &self.cell_index)
                    .await
                    .map(Arc::new)
                    .map_err(|err| FluxError::GeometryBuild {
                        scenario: self.id().to_string(),
                        source: Box::new(err),
                    })
            })
            .await
            .cloned()
    }

    /// Whether the geometry collection has been built.
    pub fn has_geometry(&self) -> bool {
        self.geometry.initialized()
    }
}

/// All scenarios known to the server, in registration order.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    order: Vec<String>,
    scenarios: HashMap<String, Arc<Scenario>>,
}

impl ScenarioRegistry {
    /// Build a registry from persisted scenario records.
    pub fn new(records: Vec<ScenarioRecord>, default_precision: u32) -> Self {
        let mut registry = Self::default();
        for record in records {
            let scenario = Scenario::new(record, default_precision);
            if scenario.gridded() && scenario.cell_index.is_empty() {
                tracing::warn!("Gridded scenario {} has an empty cell index", scenario.id());
            }
            let id = scenario.id().to_string();
            if registry
                .scenarios
                .insert(id.clone(), Arc::new(scenario))
                .is_none()
            {
                registry.order.push(id);
            }
        }
        registry
    }

    /// Load all scenarios from the store.
    pub async fn load(store: &dyn FluxStore, default_precision: u32) -> Result<Self, FluxError> {
        let records = store.load_scenarios().await?;
        let registry = Self::new(records, default_precision);
        tracing::info!("Registered {} scenarios", registry.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a scenario by name.
    pub fn get(&self, id: &str) -> Result<Arc<Scenario>, FluxError> {
        self.scenarios
            .get(id)
            .cloned()
            .ok_or_else(|| FluxError::ScenarioNotFound(id.to_string()))
    }

    /// Position of the cell at `(lon, lat)` in a scenario's grid, if both exist.
    pub fn cell_index_of(&self, id: &str, lon: f64, lat: f64) -> Option<usize> {
        self.scenarios
            .get(id)
            .and_then(|scenario| scenario.cell_index.position(lon, lat))
    }

    /// Scenarios in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Scenario>> {
        self.order.iter().filter_map(|id| self.scenarios.get(id))
    }
}
