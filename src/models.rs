//! Query parameters and the typed requests they resolve to.
//!
//! Each endpoint accepts a fixed set of parameter combinations. Deserialisation rejects unknown
//! parameters and malformed keywords, validation rejects unrecognised combinations, and
//! [TQuery::resolve] and friends turn a valid query into a request the orchestrator can execute
//! without further checks.

use crate::binning::Interval;
use crate::error::FluxError;
use crate::geometry::{parse_point, parse_polygon, GeometryPoint, GeometryPolygon};
use crate::reducers::Aggregate;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use validator::{Validate, ValidationError};

/// Parse an ISO 8601 timestamp parameter.
///
/// Accepted forms are `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM` and
/// `YYYY-MM-DDTHH:MM:SS`, interpreted as UTC, as well as full RFC 3339 timestamps. Missing parts
/// default to the start of the period.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, FluxError> {
    let invalid = || FluxError::InvalidTimestamp(value.to_string());
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    let trimmed = value.strip_suffix('Z').unwrap_or(value);
    let date = match trimmed.len() {
        4 if trimmed.bytes().all(|b| b.is_ascii_digit()) => trimmed
            .parse()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
        7 => NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d").ok(),
        10 => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok(),
        _ => None,
    };
    let naive = match date {
        Some(date) => date.and_hms_opt(0, 0, 0),
        None => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
            .ok(),
    };
    naive
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(invalid)
}

/// Format a timestamp for a response body.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn validate_timestamp(value: &str) -> Result<(), ValidationError> {
    parse_timestamp(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("timestamp must be ISO 8601: YYYY[-MM[-DD[THH:MM[:SS]]]]"))
}

/// Validate that `start` is not after `end`, when both are present and well formed.
fn validate_start_end(start: &Option<String>, end: &Option<String>) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if let (Ok(start_ts), Ok(end_ts)) = (parse_timestamp(start), parse_timestamp(end)) {
            if start_ts > end_ts {
                let mut error = ValidationError::new("start must not be after end");
                error.add_param("start".into(), start);
                error.add_param("end".into(), end);
                return Err(error);
            }
        }
    }
    Ok(())
}

/// An inclusive time window, keeping the parameters as given for echoing in responses.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_param: String,
    pub end_param: String,
}

impl TimeRange {
    fn parse(start: &str, end: &str) -> Result<Self, FluxError> {
        Ok(Self {
            start: parse_timestamp(start)?,
            end: parse_timestamp(end)?,
            start_param: start.to_string(),
            end_param: end.to_string(),
        })
    }

    fn from_params(start: &Option<String>, end: &Option<String>) -> Result<Self, FluxError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::parse(start, end),
            _ => Err(ValidationError::new("start and end are required").into()),
        }
    }
}

/// A polygon along with the WKT it was parsed from.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionQuery {
    pub polygon: GeometryPolygon,
    pub wkt: String,
}

impl RegionQuery {
    fn parse(wkt: &str) -> Result<Self, FluxError> {
        Ok(Self {
            polygon: parse_polygon(wkt)?,
            wkt: wkt.to_string(),
        })
    }
}

/// Query parameters of the time series endpoint, `t.json`
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_t_query"))]
pub struct TQuery {
    /// WKT point selecting a single cell
    pub coords: Option<String>,
    /// WKT polygon selecting a region
    pub geom: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub start: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub end: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub interval: Option<Interval>,
}

fn validate_t_query(query: &TQuery) -> Result<(), ValidationError> {
    if query.start.is_none() || query.end.is_none() {
        return Err(ValidationError::new("start and end are required"));
    }
    validate_start_end(&query.start, &query.end)?;
    match (&query.coords, &query.geom, &query.aggregate, &query.interval) {
        (Some(_), Some(_), _, _) => Err(ValidationError::new(
            "coords and geom cannot be used together",
        )),
        (Some(_), None, None, Some(_)) => {
            Err(ValidationError::new("interval requires aggregate with coords"))
        }
        (Some(_), None, Some(_), None) => {
            Err(ValidationError::new("aggregate requires interval with coords"))
        }
        (None, None, None, _) => Err(ValidationError::new(
            "one of coords, geom or aggregate is required",
        )),
        _ => Ok(()),
    }
}

/// Operations of the time series endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum TRequest {
    /// Raw values of one cell
    PointSeries {
        point: GeometryPoint,
        range: TimeRange,
    },
    /// Values of one cell reduced per bin
    PointAggregate {
        point: GeometryPoint,
        range: TimeRange,
        aggregate: Aggregate,
        interval: Interval,
    },
    /// Descriptive statistics of a region
    RegionStats {
        region: RegionQuery,
        range: TimeRange,
        interval: Option<Interval>,
    },
    /// Values of a region reduced per step, then per bin
    RegionAggregate {
        region: RegionQuery,
        range: TimeRange,
        aggregate: Aggregate,
        interval: Option<Interval>,
    },
    /// Values of the whole domain reduced per step, then per bin
    DomainAggregate {
        range: TimeRange,
        aggregate: Aggregate,
        interval: Option<Interval>,
    },
}

impl TQuery {
    /// Resolve a validated query into a request, parsing its geometry.
    pub fn resolve(&self) -> Result<TRequest, FluxError> {
        let range = TimeRange::from_params(&self.start, &self.end)?;
        let request = match (&self.coords, &self.geom, self.aggregate, self.interval) {
            (Some(coords), None, None, None) => TRequest::PointSeries {
                point: parse_point(coords)?,
                range,
            },
            (Some(coords), None, Some(aggregate), Some(interval)) => TRequest::PointAggregate {
                point: parse_point(coords)?,
                range,
                aggregate,
                interval,
            },
            (None, Some(geom), None, interval) => TRequest::RegionStats {
                region: RegionQuery::parse(geom)?,
                range,
                interval,
            },
            (None, Some(geom), Some(aggregate), interval) => TRequest::RegionAggregate {
                region: RegionQuery::parse(geom)?,
                range,
                aggregate,
                interval,
            },
            (None, None, Some(aggregate), interval) => TRequest::DomainAggregate {
                range,
                aggregate,
                interval,
            },
            _ => return Err(ValidationError::new("unrecognised parameter combination").into()),
        };
        Ok(request)
    }
}

/// Query parameters of the region of interest endpoint, `roi.json`
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_roi_query"))]
pub struct RoiQuery {
    pub geom: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub start: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub end: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub interval: Option<Interval>,
}

fn validate_roi_query(query: &RoiQuery) -> Result<(), ValidationError> {
    if query.start.is_none() || query.end.is_none() {
        return Err(ValidationError::new("start and end are required"));
    }
    if query.geom.is_none() {
        return Err(ValidationError::new("geom is required"));
    }
    validate_start_end(&query.start, &query.end)
}

impl RoiQuery {
    /// Resolve a validated query into a region statistics request.
    pub fn resolve(&self) -> Result<TRequest, FluxError> {
        let range = TimeRange::from_params(&self.start, &self.end)?;
        let Some(geom) = &self.geom else {
            return Err(ValidationError::new("geom is required").into());
        };
        if let Some(aggregate) = self.aggregate {
            return Err(FluxError::NotImplemented {
                operation: format!("{aggregate} aggregate of region statistics"),
            });
        }
        Ok(TRequest::RegionStats {
            region: RegionQuery::parse(geom)?,
            range,
            interval: self.interval,
        })
    }
}

/// Query parameters of the map endpoint, `xy.json`
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_xy_query"))]
pub struct XyQuery {
    #[validate(custom = "validate_timestamp")]
    pub time: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub start: Option<String>,
    #[validate(custom = "validate_timestamp")]
    pub end: Option<String>,
    pub aggregate: Option<Aggregate>,
    /// Emit GeoJSON-style features. Any value, including an empty one, enables it.
    pub verbose: Option<String>,
}

fn validate_xy_query(query: &XyQuery) -> Result<(), ValidationError> {
    match (&query.time, &query.start, &query.end, &query.aggregate) {
        (Some(_), None, None, None) => Ok(()),
        (Some(_), _, _, _) => Err(ValidationError::new(
            "time cannot be used with start, end or aggregate",
        )),
        (None, Some(_), Some(_), _) => validate_start_end(&query.start, &query.end),
        (None, None, None, None) => Err(ValidationError::new(
            "either time or start and end are required",
        )),
        _ => Err(ValidationError::new("start and end are required")),
    }
}

/// Operations of the map endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum XyRequest {
    /// Values of every cell, or every observation, at one time
    Snapshot {
        time: DateTime<Utc>,
        verbose: bool,
    },
    /// Values of every cell reduced over a window
    MapAggregate {
        range: TimeRange,
        aggregate: Aggregate,
        verbose: bool,
    },
    /// Observations within a window
    PointFeatures { range: TimeRange, verbose: bool },
}

impl XyQuery {
    pub fn verbose(&self) -> bool {
        self.verbose.is_some()
    }

    /// Resolve a validated query into a request.
    pub fn resolve(&self) -> Result<XyRequest, FluxError> {
        let verbose = self.verbose();
        if let Some(time) = &self.time {
            return Ok(XyRequest::Snapshot {
                time: parse_timestamp(time)?,
                verbose,
            });
        }
        let range = TimeRange::from_params(&self.start, &self.end)?;
        Ok(match self.aggregate {
            Some(aggregate) => XyRequest::MapAggregate {
                range,
                aggregate,
                verbose,
            },
            None => XyRequest::PointFeatures { range, verbose },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn t_query(params: &[(&str, &str)]) -> TQuery {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", v.replace(' ', "+")))
            .collect::<Vec<_>>()
            .join("&");
        from_query_string(&query)
    }

    // Deserialise the way the Query extractor does.
    fn from_query_string<T: serde::de::DeserializeOwned>(query: &str) -> T {
        let uri: axum::http::Uri = format!("/?{query}").parse().unwrap();
        axum::extract::Query::<T>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn timestamp_forms() {
        assert_eq!(ts("2004-01-01T00:00:00Z"), parse_timestamp("2004").unwrap());
        assert_eq!(ts("2004-05-01T00:00:00Z"), parse_timestamp("2004-05").unwrap());
        assert_eq!(ts("2004-05-19T00:00:00Z"), parse_timestamp("2004-05-19").unwrap());
        assert_eq!(
            ts("2004-05-19T03:00:00Z"),
            parse_timestamp("2004-05-19T03:00").unwrap()
        );
        assert_eq!(
            ts("2004-05-19T03:00:30Z"),
            parse_timestamp("2004-05-19T03:00:30").unwrap()
        );
        assert_eq!(
            ts("2004-05-19T03:00:30Z"),
            parse_timestamp("2004-05-19T03:00:30Z").unwrap()
        );
        assert_eq!(
            ts("2004-05-19T01:00:00Z"),
            parse_timestamp("2004-05-19T03:00:00+02:00").unwrap()
        );
    }

    #[test]
    fn timestamp_invalid() {
        for value in ["", "04", "2004-13", "2004-02-30", "May 2004", "2004-05-19T3"] {
            assert!(
                matches!(parse_timestamp(value), Err(FluxError::InvalidTimestamp(_))),
                "{value}"
            );
        }
    }

    #[test]
    fn format_timestamp_seconds() {
        assert_eq!(
            "2004-01-01T03:00:00Z",
            format_timestamp(ts("2004-01-01T03:00:00.250Z"))
        );
    }

    #[test]
    fn t_query_tokens() {
        let query = TQuery {
            coords: Some("POINT(-83 42)".to_string()),
            start: Some("2004-01-01".to_string()),
            end: Some("2004-01-03".to_string()),
            ..Default::default()
        };
        assert_de_tokens(
            &query,
            &[
                Token::Struct {
                    name: "TQuery",
                    len: 3,
                },
                Token::Str("coords"),
                Token::Some,
                Token::Str("POINT(-83 42)"),
                Token::Str("start"),
                Token::Some,
                Token::Str("2004-01-01"),
                Token::Str("end"),
                Token::Some,
                Token::Str("2004-01-03"),
                Token::StructEnd,
            ],
        );
        query.validate().unwrap()
    }

    #[test]
    fn t_query_unknown_field() {
        assert_de_tokens_error::<TQuery>(
            &[
                Token::Struct {
                    name: "TQuery",
                    len: 1,
                },
                Token::Str("foo"),
            ],
            "unknown field `foo`, expected one of `coords`, `geom`, `start`, `end`, `aggregate`, `interval`",
        )
    }

    #[test]
    fn t_query_invalid_aggregate() {
        assert_de_tokens_error::<TQuery>(
            &[
                Token::Struct {
                    name: "TQuery",
                    len: 1,
                },
                Token::Str("aggregate"),
                Token::Some,
                Token::Enum { name: "Aggregate" },
                Token::Str("sum"),
                Token::StructEnd,
            ],
            "unknown variant `sum`, expected one of `net`, `mean`, `min`, `max`, `positive`, `negative`",
        )
    }

    #[test]
    fn t_query_from_query_string() {
        let query = t_query(&[
            ("geom", "POLYGON((-84+41,-83+41,-83+42))"),
            ("start", "2004"),
            ("end", "2005"),
            ("aggregate", "net"),
            ("interval", "monthly"),
        ]);
        assert_eq!(Some(Aggregate::Net), query.aggregate);
        assert_eq!(Some(Interval::Monthly), query.interval);
        query.validate().unwrap();
    }

    #[test]
    fn t_query_combinations() {
        let ok: &[&[(&str, &str)]] = &[
            &[("coords", "POINT(-83 42)")],
            &[("coords", "POINT(-83 42)"), ("aggregate", "net"), ("interval", "daily")],
            &[("geom", "POLYGON((0 0, 1 0, 1 1))")],
            &[("geom", "POLYGON((0 0, 1 0, 1 1))"), ("interval", "monthly")],
            &[("geom", "POLYGON((0 0, 1 0, 1 1))"), ("aggregate", "min")],
            &[("aggregate", "mean")],
            &[("aggregate", "mean"), ("interval", "annual")],
        ];
        for params in ok {
            let mut params = params.to_vec();
            params.extend([("start", "2004-01-01"), ("end", "2004-02-01")]);
            let query = t_query(&params);
            query.validate().unwrap();
            query.resolve().unwrap();
        }
        let bad: &[&[(&str, &str)]] = &[
            &[],
            &[("interval", "daily")],
            &[("coords", "POINT(-83 42)"), ("geom", "POLYGON((0 0, 1 0, 1 1))")],
            &[("coords", "POINT(-83 42)"), ("interval", "daily")],
            &[("coords", "POINT(-83 42)"), ("aggregate", "net")],
        ];
        for params in bad {
            let mut params = params.to_vec();
            params.extend([("start", "2004-01-01"), ("end", "2004-02-01")]);
            assert!(t_query(&params).validate().is_err(), "{params:?}");
        }
    }

    #[test]
    #[should_panic(expected = "start and end are required")]
    fn t_query_missing_end() {
        t_query(&[("coords", "POINT(-83 42)"), ("start", "2004")])
            .validate()
            .unwrap()
    }

    #[test]
    #[should_panic(expected = "start must not be after end")]
    fn t_query_start_after_end() {
        t_query(&[("aggregate", "net"), ("start", "2005"), ("end", "2004")])
            .validate()
            .unwrap()
    }

    #[test]
    #[should_panic(expected = "timestamp must be ISO 8601")]
    fn t_query_invalid_start() {
        t_query(&[("aggregate", "net"), ("start", "yesterday"), ("end", "2004")])
            .validate()
            .unwrap()
    }

    #[test]
    fn t_query_resolve_point_series() {
        let request = t_query(&[
            ("coords", "POINT(-83+42)"),
            ("start", "2004-01-01"),
            ("end", "2004-01-03"),
        ])
        .resolve()
        .unwrap();
        let TRequest::PointSeries { point, range } = request else {
            panic!("unexpected request {request:?}");
        };
        assert_eq!(GeometryPoint::new(-83.0, 42.0), point);
        assert_eq!(ts("2004-01-03T00:00:00Z"), range.end);
        assert_eq!("2004-01-03", range.end_param);
    }

    #[test]
    fn t_query_resolve_invalid_geometry() {
        let error = t_query(&[("coords", "POINT(a b)"), ("start", "2004"), ("end", "2004")])
            .resolve()
            .unwrap_err();
        assert!(matches!(error, FluxError::InvalidGeometry { .. }), "{error:?}");
    }

    #[test]
    fn roi_query_aggregate_not_implemented() {
        let query: RoiQuery = from_query_string(
            "geom=POLYGON((0+0,1+0,1+1))&start=2004&end=2005&aggregate=net",
        );
        query.validate().unwrap();
        assert!(matches!(
            query.resolve(),
            Err(FluxError::NotImplemented { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "geom is required")]
    fn roi_query_missing_geom() {
        let query: RoiQuery = from_query_string("start=2004&end=2005");
        query.validate().unwrap()
    }

    #[test]
    fn xy_query_combinations() {
        for (query, ok) in [
            ("time=2004-01-01T03:00", true),
            ("time=2004-01-01T03:00&verbose", true),
            ("start=2004&end=2005&aggregate=max", true),
            ("start=2004&end=2005", true),
            ("", false),
            ("start=2004", false),
            ("aggregate=max", false),
            ("time=2004&aggregate=max", false),
            ("time=2004&start=2004&end=2005", false),
        ] {
            let query: XyQuery = from_query_string(query);
            assert_eq!(ok, query.validate().is_ok(), "{query:?}");
        }
    }

    #[test]
    fn xy_query_resolve() {
        let query: XyQuery = from_query_string("time=2004-01-01T03:00&verbose=");
        assert_eq!(
            XyRequest::Snapshot {
                time: ts("2004-01-01T03:00:00Z"),
                verbose: true,
            },
            query.resolve().unwrap()
        );
        let query: XyQuery = from_query_string("start=2004&end=2005");
        assert!(matches!(
            query.resolve().unwrap(),
            XyRequest::PointFeatures { verbose: false, .. }
        ));
    }
}
