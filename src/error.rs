//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;
use tracing::{event, Level};

/// Flux server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum FluxError {
    /// Stored documents could not be decoded
    #[error("failed to decode stored document")]
    Decode(#[from] serde_json::Error),

    /// Attempt to perform a reduction on an empty sequence
    #[error("cannot perform {operation} on empty array or selection")]
    EmptyArray { operation: String },

    /// Building the geometry collection for a scenario failed
    #[error("failed to build geometry collection for scenario {scenario}")]
    GeometryBuild {
        scenario: String,
        #[source]
        source: Box<FluxError>,
    },

    /// A stored gridded slice does not match the scenario's cell index
    #[error("slice at {timestamp} has {actual} values, expected {expected}")]
    InconsistentSlice {
        timestamp: String,
        actual: usize,
        expected: usize,
    },

    /// A cell index entry cannot be used as a point geometry
    #[error("cell {index} has invalid coordinates")]
    InvalidCell { index: usize },

    /// Malformed WKT geometry
    #[error("invalid geometry {wkt:?}: {reason}")]
    InvalidGeometry { wkt: String, reason: String },

    /// Malformed timestamp parameter
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    /// No cell of the scenario is located at the requested point
    #[error("no cell at POINT({lon} {lat})")]
    CellNotFound { lon: f64, lat: f64 },

    /// The time range selected no data
    #[error("no data found")]
    NoData,

    /// The polygon does not intersect any cell
    #[error("no results for geometry query")]
    NoIntersectingCells,

    /// The scenario has no stored summary statistics
    #[error("no summary statistics for scenario {0}")]
    NoSummaryStats(String),

    /// A recognised request that has not been implemented
    #[error("not implemented: {operation}")]
    NotImplemented { operation: String },

    /// Error deserialising the query string
    #[error("request parameters are not valid")]
    RequestQueryRejection(#[from] QueryRejection),

    /// Error validating request parameters (single error)
    #[error("request parameters are not valid")]
    RequestValidationSingle(#[from] validator::ValidationError),

    /// Error validating request parameters (multiple errors)
    #[error("request parameters are not valid")]
    RequestValidation(#[from] validator::ValidationErrors),

    /// Unknown scenario
    #[error("scenario {0} not found")]
    ScenarioNotFound(String),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating ndarray Array from Shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error reading from or writing to the store
    #[error("storage error")]
    Storage(#[from] sled::Error),

    /// A blocking storage task failed to complete
    #[error("storage task failed")]
    TaskJoin(#[from] JoinError),

    /// The aggregation would exceed the configured memory limit
    #[error("request too large to aggregate ({requested} > {total} bytes)")]
    TooLarge { requested: usize, total: usize },

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Geometry type that is recognised but not supported
    #[error("unsupported geometry type {kind}")]
    UnsupportedGeometry { kind: String },
}

impl IntoResponse for FluxError {
    /// Convert from a `FluxError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }

    /// Return an ErrorBody that does not leak any detail of the error.
    fn opaque() -> Self {
        ErrorBody {
            message: "internal server error".to_string(),
            caused_by: None,
        }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 413 payload too large ErrorResponse
    fn too_large<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, error)
    }

    /// Return a 501 not implemented ErrorResponse
    fn not_implemented<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_IMPLEMENTED, error)
    }

    /// Return a 500 internal server error ErrorResponse
    ///
    /// The body is generic; the details are only logged.
    fn internal_server_error() -> Self {
        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ErrorBody::opaque(),
        }
    }
}

impl From<FluxError> for ErrorResponse {
    /// Convert from a `FluxError` into an `ErrorResponse`.
    fn from(error: FluxError) -> Self {
        let response = match &error {
            // Bad request
            FluxError::InvalidGeometry { .. }
            | FluxError::InvalidTimestamp(_)
            | FluxError::RequestQueryRejection(_)
            | FluxError::RequestValidationSingle(_)
            | FluxError::RequestValidation(_)
            | FluxError::UnsupportedGeometry { .. } => Self::bad_request(&error),

            // Not found
            FluxError::CellNotFound { .. }
            | FluxError::NoData
            | FluxError::NoIntersectingCells
            | FluxError::NoSummaryStats(_)
            | FluxError::ScenarioNotFound(_) => Self::not_found(&error),

            // Payload too large
            FluxError::TooLarge { .. } => Self::too_large(&error),

            // Not implemented
            FluxError::NotImplemented { .. } => Self::not_implemented(&error),

            // Internal server error
            FluxError::Decode(_)
            | FluxError::EmptyArray { .. }
            | FluxError::GeometryBuild { .. }
            | FluxError::InconsistentSlice { .. }
            | FluxError::InvalidCell { .. }
            | FluxError::SemaphoreAcquireError(_)
            | FluxError::ShapeInvalid(_)
            | FluxError::Storage(_)
            | FluxError::TaskJoin(_)
            | FluxError::TryFromInt(_) => Self::internal_server_error(),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_flux_error(
        error: FluxError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn invalid_geometry() {
        let error = FluxError::InvalidGeometry {
            wkt: "POINT(a b)".to_string(),
            reason: "non-numeric coordinate".to_string(),
        };
        let message = "invalid geometry \"POINT(a b)\": non-numeric coordinate";
        test_flux_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn unsupported_geometry() {
        let error = FluxError::UnsupportedGeometry {
            kind: "MULTIPOLYGON".to_string(),
        };
        let message = "unsupported geometry type MULTIPOLYGON";
        test_flux_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn request_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = FluxError::RequestValidationSingle(validation_error);
        let message = "request parameters are not valid";
        let caused_by = Some(vec!["Validation error: foo [{}]"]);
        test_flux_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn request_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = FluxError::RequestValidation(validation_errors);
        let message = "request parameters are not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_flux_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn scenario_not_found() {
        let error = FluxError::ScenarioNotFound("foo".to_string());
        test_flux_error(error, StatusCode::NOT_FOUND, "scenario foo not found", None).await;
    }

    #[tokio::test]
    async fn cell_not_found() {
        let error = FluxError::CellNotFound {
            lon: -83.0,
            lat: 42.5,
        };
        test_flux_error(error, StatusCode::NOT_FOUND, "no cell at POINT(-83 42.5)", None).await;
    }

    #[tokio::test]
    async fn no_intersecting_cells() {
        let error = FluxError::NoIntersectingCells;
        let message = "no results for geometry query";
        test_flux_error(error, StatusCode::NOT_FOUND, message, None).await;
    }

    #[tokio::test]
    async fn too_large() {
        let error = FluxError::TooLarge {
            requested: 2,
            total: 1,
        };
        let message = "request too large to aggregate (2 > 1 bytes)";
        test_flux_error(error, StatusCode::PAYLOAD_TOO_LARGE, message, None).await;
    }

    #[tokio::test]
    async fn not_implemented() {
        let error = FluxError::NotImplemented {
            operation: "foo".to_string(),
        };
        test_flux_error(error, StatusCode::NOT_IMPLEMENTED, "not implemented: foo", None).await;
    }

    #[tokio::test]
    async fn empty_array_is_opaque() {
        let error = FluxError::EmptyArray {
            operation: "mean".to_string(),
        };
        let message = "internal server error";
        test_flux_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn geometry_build_is_opaque() {
        let error = FluxError::GeometryBuild {
            scenario: "foo".to_string(),
            source: Box::new(FluxError::InvalidCell { index: 3 }),
        };
        let message = "internal server error";
        test_flux_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = FluxError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        let message = "internal server error";
        test_flux_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn shape_error() {
        let error = FluxError::ShapeInvalid(ShapeError::from_kind(
            ndarray::ErrorKind::OutOfBounds,
        ));
        let message = "internal server error";
        test_flux_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[test]
    fn geometry_build_has_source() {
        let error = FluxError::GeometryBuild {
            scenario: "foo".to_string(),
            source: Box::new(FluxError::InvalidCell { index: 3 }),
        };
        assert_eq!(
            "cell 3 has invalid coordinates",
            error.source().unwrap().to_string()
        );
    }
}
