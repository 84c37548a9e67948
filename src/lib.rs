//! This crate provides fluxvis, a query and aggregation server for spatiotemporal flux data.
//! Scenarios are either gridded, with one value per grid cell at each time step, or free-form
//! point observations. By aggregating over space and time on the server, clients receive compact
//! series and maps rather than raw data.
//!
//! Clients select data with a point, a polygon or the whole domain, over an inclusive time
//! window, optionally reducing it with one of the [reducers::Aggregate] operations and binning it
//! by calendar [binning::Interval].
//!
//! fluxvis is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of query parameters, stored documents and
//!   responses.
//! * [sled] is an embedded, ordered key-value store holding scenarios and their time slices.
//! * [geo] answers polygon intersection tests.
//! * [ndarray] provides n-dimensional arrays used in numerical computation.

pub mod app;
pub mod app_state;
pub mod binning;
pub mod cli;
pub mod error;
pub mod geometry;
pub mod metrics;
pub mod models;
pub mod precision;
pub mod query;
pub mod reducers;
pub mod resource_manager;
pub mod responses;
pub mod scenario;
pub mod server;
pub mod sled_store;
pub mod spatial_index;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_query;
