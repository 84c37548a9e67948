use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::error::FluxError;
use crate::scenario::{ScenarioMetadata, ScenarioRegistry, SummaryStats};
use crate::sled_store::SledStore;
use crate::spatial_index::{CellIndex, GeometryCollection};
use crate::store::{
    FluxStore, GriddedSlice, PointProperties, PointSlice, ScenarioRecord, Slices, TimeSlice,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Values of the gridded test scenario on 2004-01-01, 02 and 03. Cell 8 is missing on the last
/// day.
pub(crate) const GRIDDED_VALUES: [[f64; 9]; 3] = [
    [1.0, 5.0, 3.0, 2.5, 0.5, -1.0, 4.0, 0.25, 2.0],
    [4.0, 2.0, 6.0, -0.5, 1.5, 3.0, 1.0, 0.75, -2.0],
    [3.0, 4.0, -9.0, 1.0, -2.5, 0.5, 2.0, 1.25, f64::NAN],
];

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&Utc)
}

/// Series of one cell of the gridded test scenario.
pub(crate) fn cell_series(cell: usize) -> Vec<f64> {
    GRIDDED_VALUES.iter().map(|values| values[cell]).collect()
}

/// Command line arguments with defaults and no resource limits.
pub(crate) fn get_test_args() -> CommandLineArgs {
    CommandLineArgs {
        host: "127.0.0.1".to_string(),
        port: 8080,
        https: false,
        cert_file: String::new(),
        key_file: String::new(),
        graceful_shutdown_timeout: 1,
        enable_jaeger: false,
        use_rayon: false,
        store_path: String::new(),
        precision: 2,
        memory_limit: None,
        thread_limit: Some(1),
    }
}

/// A 3 x 3 grid at whole degrees, row by row from the south west corner.
pub(crate) fn get_test_cell_index() -> CellIndex {
    let mut cells = vec![];
    for lat in [41.0, 42.0, 43.0] {
        for lon in [-84.0, -83.0, -82.0] {
            cells.push([lon, lat]);
        }
    }
    CellIndex::new(cells)
}

pub(crate) fn get_test_gridded_record() -> ScenarioRecord {
    let mut metadata = ScenarioMetadata::new("gridded", true);
    metadata.title = Some("Gridded test scenario".to_string());
    metadata.stats = Some(SummaryStats {
        mean: 1.5,
        std: 2.75,
        min: -9.0,
        max: 6.0,
        median: None,
    });
    ScenarioRecord {
        metadata,
        cell_index: get_test_cell_index(),
    }
}

pub(crate) fn get_test_points_record() -> ScenarioRecord {
    ScenarioRecord {
        metadata: ScenarioMetadata::new("points", false),
        cell_index: CellIndex::default(),
    }
}

/// Observations of the non-gridded test scenario, two per day on 2004-01-01 and 02.
pub(crate) fn get_test_points() -> Vec<PointSlice> {
    let point = |timestamp: &str, coordinates: [f64; 2], value: f64| PointSlice {
        timestamp: ts(timestamp),
        coordinates,
        properties: PointProperties { value },
    };
    vec![
        point("2004-01-01T00:00:00Z", [-83.0, 42.0], 1.5),
        point("2004-01-01T00:00:00Z", [-82.0, 43.0], 2.0),
        point("2004-01-02T00:00:00Z", [-83.0, 42.0], -0.5),
        point("2004-01-02T00:00:00Z", [-82.0, 43.0], 4.0),
    ]
}

/// Registry of the gridded and non-gridded test scenarios.
pub(crate) fn get_test_registry() -> ScenarioRegistry {
    ScenarioRegistry::new(
        vec![get_test_gridded_record(), get_test_points_record()],
        2,
    )
}

/// A temporary sled database holding both test scenarios.
pub(crate) fn get_test_sled_store() -> SledStore {
    let store = SledStore::temporary().unwrap();
    store.put_scenario(&get_test_gridded_record()).unwrap();
    store.put_scenario(&get_test_points_record()).unwrap();
    for (day, values) in GRIDDED_VALUES.iter().enumerate() {
        let slice = TimeSlice::Gridded(GriddedSlice {
            timestamp: ts(&format!("2004-01-0{}T00:00:00Z", day + 1)),
            values: values.to_vec(),
        });
        store.put_slice("gridded", &slice).unwrap();
    }
    for point in get_test_points() {
        store.put_slice("points", &TimeSlice::Point(point)).unwrap();
    }
    store
}

pub(crate) fn get_test_store() -> Arc<dyn FluxStore> {
    Arc::new(get_test_sled_store())
}

/// Shared state over a fresh test store.
pub(crate) async fn get_test_state(args: CommandLineArgs) -> SharedAppState {
    Arc::new(AppState::new(&args, get_test_store()).await.unwrap())
}

/// A store whose geometry builds are slow and fail a given number of times before succeeding.
pub(crate) struct FailingGeometryStore {
    failures: usize,
    pub builds: AtomicUsize,
}

impl FailingGeometryStore {
    pub(crate) fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            builds: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FluxStore for FailingGeometryStore {
    async fn load_scenarios(&self) -> Result<Vec<ScenarioRecord>, FluxError> {
        Ok(vec![get_test_gridded_record()])
    }

    async fn find_by_time_range(
        &self,
        scenario: &ScenarioMetadata,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Slices, FluxError> {
        Ok(Slices::empty(scenario.gridded))
    }

    async fn find_by_exact_time(
        &self,
        scenario: &ScenarioMetadata,
        _timestamp: DateTime<Utc>,
    ) -> Result<Slices, FluxError> {
        Ok(Slices::empty(scenario.gridded))
    }

    async fn build_geometry_collection(
        &self,
        _scenario: &ScenarioMetadata,
        cell_index: &CellIndex,
    ) -> Result<GeometryCollection, FluxError> {
        let build = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        if build <= self.failures {
            return Err(FluxError::InvalidCell { index: 0 });
        }
        GeometryCollection::build(cell_index)
    }
}
