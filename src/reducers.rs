//! Aggregation reducers and descriptive statistics.

use crate::error::FluxError;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// A reduction of a sequence of values to a single value.
pub type Reducer = fn(ArrayView1<f64>) -> f64;

/// Named reducers accepted by the `aggregate` query parameter.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Aggregate {
    /// Sum of all values
    Net,
    /// Arithmetic mean
    Mean,
    /// Minimum, ignoring missing values
    Min,
    /// Maximum, ignoring missing values
    Max,
    /// Sum of the positive values
    Positive,
    /// Sum of the negative values
    Negative,
}

impl Aggregate {
    /// Every variant, in declaration order.
    pub const ALL: [Aggregate; 6] = [
        Aggregate::Net,
        Aggregate::Mean,
        Aggregate::Min,
        Aggregate::Max,
        Aggregate::Positive,
        Aggregate::Negative,
    ];

    /// Returns the reducer function for this aggregate.
    pub fn reducer(self) -> Reducer {
        match self {
            Aggregate::Net => net,
            Aggregate::Mean => mean,
            Aggregate::Min => min,
            Aggregate::Max => max,
            Aggregate::Positive => positive,
            Aggregate::Negative => negative,
        }
    }

    /// Whether the reducer is undefined on an empty sequence.
    fn requires_values(self) -> bool {
        matches!(self, Aggregate::Mean | Aggregate::Min | Aggregate::Max)
    }

    /// Reduce `values`, rejecting an empty sequence where the reduction is undefined.
    pub fn reduce(self, values: ArrayView1<f64>) -> Result<f64, FluxError> {
        if values.is_empty() && self.requires_values() {
            return Err(FluxError::EmptyArray {
                operation: self.to_string(),
            });
        }
        Ok(self.reducer()(values))
    }

    /// Reduce each row of a `steps x cells` matrix, giving one value per step.
    pub fn reduce_rows(self, matrix: ArrayView2<f64>) -> Result<Vec<f64>, FluxError> {
        if matrix.ncols() == 0 && self.requires_values() {
            return Err(FluxError::EmptyArray {
                operation: self.to_string(),
            });
        }
        let reducer = self.reducer();
        Ok(matrix.map_axis(Axis(1), reducer).to_vec())
    }

    /// Reduce each column of a `steps x cells` matrix, giving one value per cell.
    pub fn reduce_columns(self, matrix: ArrayView2<f64>) -> Result<Vec<f64>, FluxError> {
        if matrix.nrows() == 0 && self.requires_values() {
            return Err(FluxError::EmptyArray {
                operation: self.to_string(),
            });
        }
        let reducer = self.reducer();
        Ok(matrix.map_axis(Axis(0), reducer).to_vec())
    }
}

fn net(values: ArrayView1<f64>) -> f64 {
    values.sum()
}

fn mean(values: ArrayView1<f64>) -> f64 {
    values.sum() / values.len() as f64
}

// f64::min returns the non-NaN operand, so missing values drop out.
fn min(values: ArrayView1<f64>) -> f64 {
    values.fold(f64::NAN, |acc, v| acc.min(*v))
}

fn max(values: ArrayView1<f64>) -> f64 {
    values.fold(f64::NAN, |acc, v| acc.max(*v))
}

fn positive(values: ArrayView1<f64>) -> f64 {
    values.fold(0.0, |acc, v| if *v > 0.0 { acc + v } else { acc })
}

fn negative(values: ArrayView1<f64>) -> f64 {
    values.fold(0.0, |acc, v| if *v < 0.0 { acc + v } else { acc })
}

/// Descriptive statistics of a set of values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl Stats {
    /// Compute the statistics of `values`.
    ///
    /// Missing (NaN) values are skipped and not counted in `n`. If every value is missing the
    /// statistics are NaN with `n` of zero.
    pub fn of(values: ArrayView1<f64>) -> Result<Self, FluxError> {
        if values.is_empty() {
            return Err(FluxError::EmptyArray {
                operation: "stats".to_string(),
            });
        }
        let present: Array1<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let Some(mean) = present.mean() else {
            return Ok(Self {
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
                n: 0,
            });
        };
        Ok(Self {
            mean,
            std: present.std(0.0),
            min: min(present.view()),
            max: max(present.view()),
            n: present.len(),
        })
    }

    /// Compute the statistics of a slice of values.
    pub fn of_slice(values: &[f64]) -> Result<Self, FluxError> {
        Self::of(ArrayView1::from(values))
    }
}
