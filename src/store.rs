//! Storage collaborator interface.
//!
//! The query engine only needs ordered range reads, exact-time reads and a one-off build of each
//! scenario's geometry collection. [crate::sled_store::SledStore] is the production
//! implementation.

use crate::error::FluxError;
use crate::scenario::ScenarioMetadata;
use crate::spatial_index::{CellIndex, GeometryCollection};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// (De)serialise `f64` values that may be stored as JSON `null`.
///
/// Missing values are held as NaN in memory. serde_json writes non-finite floats as `null`, so
/// serialisation needs no special handling.
pub(crate) mod nullable {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }

    pub mod vec {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            values.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<f64>, D::Error> {
            let values = Vec::<Option<f64>>::deserialize(deserializer)?;
            Ok(values
                .into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect())
        }
    }
}

/// One time step of a gridded scenario: a value per cell, in [CellIndex] order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GriddedSlice {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "nullable::vec")]
    pub values: Vec<f64>,
}

/// Properties of a free-form point observation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PointProperties {
    #[serde(with = "nullable")]
    pub value: f64,
}

/// One observation of a non-gridded scenario. Several may share a timestamp.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PointSlice {
    pub timestamp: DateTime<Utc>,
    pub coordinates: [f64; 2],
    pub properties: PointProperties,
}

/// A single stored record.
#[derive(Clone, Debug, PartialEq)]
pub enum TimeSlice {
    Gridded(GriddedSlice),
    Point(PointSlice),
}

impl TimeSlice {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimeSlice::Gridded(slice) => slice.timestamp,
            TimeSlice::Point(slice) => slice.timestamp,
        }
    }
}

/// Records returned by a read, discriminated by the scenario's `gridded` flag.
#[derive(Clone, Debug, PartialEq)]
pub enum Slices {
    Gridded(Vec<GriddedSlice>),
    Point(Vec<PointSlice>),
}

impl Slices {
    /// An empty result of the right kind for the scenario.
    pub fn empty(gridded: bool) -> Self {
        if gridded {
            Slices::Gridded(vec![])
        } else {
            Slices::Point(vec![])
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Slices::Gridded(slices) => slices.len(),
            Slices::Point(slices) => slices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A scenario as persisted: its metadata document and its cell index.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioRecord {
    pub metadata: ScenarioMetadata,
    pub cell_index: CellIndex,
}

/// Storage collaborator trait.
///
/// Reads never retry; an error is terminal for the request that issued it.
#[async_trait]
pub trait FluxStore: Send + Sync {
    /// Load every registered scenario.
    async fn load_scenarios(&self) -> Result<Vec<ScenarioRecord>, FluxError>;

    /// Records with `start <= timestamp <= end`, in ascending timestamp order.
    async fn find_by_time_range(
        &self,
        scenario: &ScenarioMetadata,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Slices, FluxError>;

    /// Records stamped exactly `timestamp`.
    async fn find_by_exact_time(
        &self,
        scenario: &ScenarioMetadata,
        timestamp: DateTime<Utc>,
    ) -> Result<Slices, FluxError>;

    /// Build the point geometry collection used for polygon queries on a scenario.
    ///
    /// The default builds it in memory from the cell index.
    async fn build_geometry_collection(
        &self,
        _scenario: &ScenarioMetadata,
        cell_index: &CellIndex,
    ) -> Result<GeometryCollection, FluxError> {
        GeometryCollection::build(cell_index)
    }
}
