//! Temporal binning.
//!
//! Time steps are grouped by truncating each timestamp to the UTC calendar start of the binning
//! unit. A bin is identified by that start timestamp, so bins sort chronologically regardless of
//! unit.

use crate::error::FluxError;
use crate::reducers::Aggregate;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;

/// Binning interval accepted by the `interval` query parameter.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Interval {
    Daily,
    /// ISO weeks, starting on Monday
    Weekly,
    Monthly,
    Quarterly,
    #[serde(alias = "yearly")]
    Annual,
}

/// A group of time steps sharing a bin.
#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    /// Start of the bin, or the exact timestamp when not binning.
    pub start: DateTime<Utc>,
    /// Positions of the member time steps in the input series, ascending.
    pub rows: Vec<usize>,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Truncate a timestamp to the start of its bin.
pub fn bin_start(timestamp: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    let date = match interval {
        Interval::Daily => date,
        Interval::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
        Interval::Monthly => date.with_day(1).unwrap_or(date),
        Interval::Quarterly => {
            let month = (date.month0() / 3) * 3 + 1;
            date.with_day(1)
                .and_then(|date| date.with_month(month))
                .unwrap_or(date)
        }
        Interval::Annual => date.with_ordinal(1).unwrap_or(date),
    };
    start_of_day(date)
}

/// Assign each timestamp to a bin.
///
/// Without an interval there is one bin per distinct timestamp. Bins are returned in
/// chronological order and every input position appears in exactly one bin.
pub fn bin_timestamps(timestamps: &[DateTime<Utc>], interval: Option<Interval>) -> Vec<Bin> {
    let mut bins: BTreeMap<DateTime<Utc>, Vec<usize>> = BTreeMap::new();
    for (row, timestamp) in timestamps.iter().enumerate() {
        let start = match interval {
            Some(interval) => bin_start(*timestamp, interval),
            None => *timestamp,
        };
        bins.entry(start).or_default().push(row);
    }
    bins.into_iter()
        .map(|(start, rows)| Bin { start, rows })
        .collect()
}

/// Reduce a `steps x cells` matrix to a `bins x cells` matrix.
///
/// Each cell is reduced independently over the rows of each bin. Without an aggregate the
/// per-cell mean of the bin is taken.
pub fn reduce_bins(
    matrix: ArrayView2<f64>,
    bins: &[Bin],
    aggregate: Option<Aggregate>,
) -> Result<Array2<f64>, FluxError> {
    let aggregate = aggregate.unwrap_or(Aggregate::Mean);
    let mut reduced = Array2::zeros((bins.len(), matrix.ncols()));
    for (bin, mut row) in bins.iter().zip(reduced.rows_mut()) {
        let members = matrix.select(Axis(0), &bin.rows);
        let values = aggregate.reduce_columns(members.view())?;
        row.assign(&ndarray::ArrayView1::from(&values));
    }
    Ok(reduced)
}

/// Reduce a single series, one value per time step, to one value per bin.
pub fn reduce_series(
    series: &[f64],
    bins: &[Bin],
    aggregate: Option<Aggregate>,
) -> Result<Vec<f64>, FluxError> {
    let view = ndarray::ArrayView1::from(series).insert_axis(Axis(1));
    let reduced = reduce_bins(view, bins, aggregate)?;
    Ok(reduced.column(0).to_vec())
}

/// Pool variable-length groups of values by bin.
///
/// Used for point observations, where the number of values per time step varies.
pub fn pool_bins(groups: &[Vec<f64>], bins: &[Bin]) -> Vec<Vec<f64>> {
    bins.iter()
        .map(|bin| {
            bin.rows
                .iter()
                .flat_map(|row| groups[*row].iter().copied())
                .collect()
        })
        .collect()
}
