//! [FluxStore] backed by an embedded sled database.
//!
//! Layout:
//!
//! * tree `metadata`: scenario id -> JSON [ScenarioMetadata]
//! * tree `coord_index`: scenario id -> JSON `[[lon, lat], ...]`
//! * tree `data/{id}`: key -> JSON time slice
//!
//! Data keys are the slice timestamp in milliseconds, encoded so that byte order matches time
//! order, followed by a sequence number that keeps non-unique timestamps distinct. A key range
//! scan therefore yields slices in ascending timestamp order.

use crate::error::FluxError;
use crate::scenario::ScenarioMetadata;
use crate::spatial_index::CellIndex;
use crate::store::{FluxStore, ScenarioRecord, Slices, TimeSlice};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sled::{IVec, Tree};
use std::path::Path;

const METADATA_TREE: &str = "metadata";
const COORD_INDEX_TREE: &str = "coord_index";

/// Encode a timestamp as 8 bytes whose lexicographic order is chronological.
fn timestamp_prefix(timestamp: DateTime<Utc>) -> [u8; 8] {
    ((timestamp.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
}

fn data_key(timestamp: DateTime<Utc>, sequence: u64) -> [u8; 16] {
    let mut key = [0; 16];
    key[..8].copy_from_slice(&timestamp_prefix(timestamp));
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

fn decode<T, I>(entries: I) -> Result<Vec<T>, FluxError>
where
    T: DeserializeOwned,
    I: Iterator<Item = sled::Result<(IVec, IVec)>>,
{
    entries
        .map(|entry| -> Result<T, FluxError> {
            let (_, value) = entry?;
            Ok(serde_json::from_slice(&value)?)
        })
        .collect()
}

fn decode_slices<I>(gridded: bool, entries: I) -> Result<Slices, FluxError>
where
    I: Iterator<Item = sled::Result<(IVec, IVec)>>,
{
    if gridded {
        Ok(Slices::Gridded(decode(entries)?))
    } else {
        Ok(Slices::Point(decode(entries)?))
    }
}

/// sled implementation of [FluxStore].
#[derive(Clone, Debug)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a database at `path`.
    pub fn open(path: &Path) -> Result<Self, FluxError> {
        tracing::info!("Opening store at {}", path.display());
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Open a database that is deleted when dropped.
    pub fn temporary() -> Result<Self, FluxError> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn data_tree(&self, scenario: &str) -> Result<Tree, FluxError> {
        Ok(self.db.open_tree(format!("data/{scenario}"))?)
    }

    /// Register a scenario, replacing any previous metadata and cell index.
    pub fn put_scenario(&self, record: &ScenarioRecord) -> Result<(), FluxError> {
        let id = record.metadata.id.as_bytes();
        self.db
            .open_tree(METADATA_TREE)?
            .insert(id, serde_json::to_vec(&record.metadata)?)?;
        self.db
            .open_tree(COORD_INDEX_TREE)?
            .insert(id, serde_json::to_vec(&record.cell_index)?)?;
        Ok(())
    }

    /// Add a time slice to a scenario's data.
    ///
    /// A gridded slice replaces any gridded slice already stored at the same timestamp. Point
    /// observations accumulate, so several may share a timestamp.
    pub fn put_slice(&self, scenario: &str, slice: &TimeSlice) -> Result<(), FluxError> {
        let (value, sequence) = match slice {
            TimeSlice::Gridded(slice) => (serde_json::to_vec(slice)?, 0),
            TimeSlice::Point(slice) => (serde_json::to_vec(slice)?, self.db.generate_id()?),
        };
        let key = data_key(slice.timestamp(), sequence);
        self.data_tree(scenario)?.insert(key, value)?;
        Ok(())
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), FluxError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl FluxStore for SledStore {
    async fn load_scenarios(&self) -> Result<Vec<ScenarioRecord>, FluxError> {
        let metadata = self.db.open_tree(METADATA_TREE)?;
        let coord_index = self.db.open_tree(COORD_INDEX_TREE)?;
        tokio::task::spawn_blocking(move || {
            let metadata: Vec<ScenarioMetadata> = decode(metadata.iter())?;
            metadata
                .into_iter()
                .map(|metadata| -> Result<ScenarioRecord, FluxError> {
                    let cell_index = match coord_index.get(metadata.id.as_bytes())? {
                        Some(value) => serde_json::from_slice(&value)?,
                        None => CellIndex::default(),
                    };
                    Ok(ScenarioRecord {
                        metadata,
                        cell_index,
                    })
                })
                .collect()
        })
        .await?
    }

    async fn find_by_time_range(
        &self,
        scenario: &ScenarioMetadata,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Slices, FluxError> {
        if start > end {
            return Ok(Slices::empty(scenario.gridded));
        }
        let tree = self.data_tree(&scenario.id)?;
        let gridded = scenario.gridded;
        let (lower, upper) = (data_key(start, 0), data_key(end, u64::MAX));
        let slices =
            tokio::task::spawn_blocking(move || decode_slices(gridded, tree.range(lower..=upper)))
                .await??;
        // Keys are truncated to milliseconds; apply the exact bounds.
        Ok(retain(slices, |timestamp| timestamp >= start && timestamp <= end))
    }

    async fn find_by_exact_time(
        &self,
        scenario: &ScenarioMetadata,
        timestamp: DateTime<Utc>,
    ) -> Result<Slices, FluxError> {
        let tree = self.data_tree(&scenario.id)?;
        let gridded = scenario.gridded;
        let prefix = timestamp_prefix(timestamp);
        let slices =
            tokio::task::spawn_blocking(move || decode_slices(gridded, tree.scan_prefix(prefix)))
                .await??;
        Ok(retain(slices, |t| t == timestamp))
    }
}

fn retain<F>(slices: Slices, keep: F) -> Slices
where
    F: Fn(DateTime<Utc>) -> bool,
{
    match slices {
        Slices::Gridded(mut slices) => {
            slices.retain(|slice| keep(slice.timestamp));
            Slices::Gridded(slices)
        }
        Slices::Point(mut slices) => {
            slices.retain(|slice| keep(slice.timestamp));
            Slices::Point(slices)
        }
    }
}
