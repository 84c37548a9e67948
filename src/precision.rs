//! Output precision.
//!
//! Every number in a response body passes through [round] using the effective precision of the
//! scenario being queried.

/// Largest supported number of decimal places. `f64` carries about 15 significant digits.
pub const MAX_PRECISION: u32 = 15;

/// Round `value` to `precision` decimal places, half away from zero.
///
/// Non-finite values are returned unchanged so that missing values serialise as `null`. Negative
/// zero is normalised to zero so that `-0.001` at two places renders as `0.0`.
pub fn round(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10_f64.powi(precision.min(MAX_PRECISION) as i32);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded + 0.0
    } else {
        value
    }
}

/// Round every value of a sequence.
pub fn round_all<I>(values: I, precision: u32) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .map(|value| round(value, precision))
        .collect()
}
