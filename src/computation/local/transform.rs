//! Computed-column evaluation over the working row set.
//!
//! Transforms are evaluated column-wise: the row set is pivoted into a
//! frame once, each computed column is appended to it, and later entries
//! in the same step see the columns produced by earlier ones.

use serde_json::Value;

use crate::computation::{ComputationError, ComputationResult};
use crate::model::temporal::{self, parse_timestamp};
use crate::model::{Expression, Row};
use crate::workflow::FieldTransform;

use super::sql_eval::{self, Frame};
use super::value::{as_f64, from_f64};

/// Append every computed column to the rows.
pub(crate) fn apply(
    mut rows: Vec<Row>,
    transforms: &[FieldTransform],
) -> ComputationResult<Vec<Row>> {
    if rows.is_empty() || transforms.is_empty() {
        return Ok(rows);
    }
    let len = rows.len();
    let mut frame = to_frame(&rows);

    for entry in transforms {
        let column = evaluate(&entry.expression, &frame, len)?;
        for (row, value) in rows.iter_mut().zip(column.iter()) {
            row.insert(entry.key.clone(), value.clone());
        }
        frame.insert(entry.key.clone(), column);
    }
    Ok(rows)
}

fn to_frame(rows: &[Row]) -> Frame {
    let mut frame = Frame::new();
    for (i, row) in rows.iter().enumerate() {
        for (key, value) in row {
            frame
                .entry(key.clone())
                .or_insert_with(|| vec![Value::Null; rows.len()])[i] = value.clone();
        }
    }
    frame
}

fn evaluate(
    expression: &Expression,
    frame: &Frame,
    len: usize,
) -> ComputationResult<Vec<Value>> {
    match expression {
        Expression::Bin { field, bin_count } => {
            Ok(bin(require(frame, field)?, *bin_count))
        }
        Expression::BinCount { field, bin_count } => {
            Ok(bin_count_values(require(frame, field)?, *bin_count))
        }
        Expression::Log { field, base } => Ok(require(frame, field)?
            .iter()
            .map(|v| match as_f64(v) {
                Some(x) if x > 0.0 => from_f64(x.ln() / base.ln()),
                _ => Value::Null,
            })
            .collect()),
        Expression::DateTimeDrill {
            field,
            level,
            offset,
        } => Ok(require(frame, field)?
            .iter()
            .map(|v| match parse_timestamp(v) {
                Some(ms) => temporal::drill(ms, offset.unwrap_or(0), *level),
                None => Value::Null,
            })
            .collect()),
        Expression::DateTimeFeature {
            field,
            level,
            offset,
        } => Ok(require(frame, field)?
            .iter()
            .map(|v| match parse_timestamp(v) {
                Some(ms) => temporal::feature(ms, offset.unwrap_or(0), *level),
                None => Value::Null,
            })
            .collect()),
        Expression::One => Ok(vec![Value::from(1); len]),
        Expression::Sql { sql } => sql_eval::evaluate(sql, frame, len),
    }
}

fn require<'a>(frame: &'a Frame, field: &str) -> ComputationResult<&'a Vec<Value>> {
    frame
        .get(field)
        .ok_or_else(|| ComputationError::Expression(format!("there is no field named {}", field)))
}

/// Equal-width binning. Output is the 0-based bucket index; the maximum
/// value clamps into the last bucket and non-numeric values become null.
fn bin(values: &[Value], bin_count: usize) -> Vec<Value> {
    let nums: Vec<Option<f64>> = values.iter().map(|v| as_f64(v).filter(|f| f.is_finite())).collect();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for n in nums.iter().flatten() {
        if *n < lo {
            lo = *n;
        }
        if *n > hi {
            hi = *n;
        }
    }
    if lo > hi {
        return vec![Value::Null; values.len()];
    }
    let width = (hi - lo) / bin_count as f64;
    nums.iter()
        .map(|n| match n {
            Some(v) => {
                let index = if width == 0.0 {
                    0
                } else {
                    let i = ((v - lo) / width).floor() as usize;
                    i.min(bin_count - 1)
                };
                Value::from(index as u64)
            }
            None => Value::Null,
        })
        .collect()
}

/// Equal-frequency binning: values are ranked and split into `bin_count`
/// groups of (nearly) equal size. Output is the 0-based bucket index.
fn bin_count_values(values: &[Value], bin_count: usize) -> Vec<Value> {
    let mut valid: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| as_f64(v).filter(|f| f.is_finite()).map(|f| (i, f)))
        .collect();
    valid.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = vec![Value::Null; values.len()];
    if valid.is_empty() {
        return out;
    }
    let group_size = valid.len() as f64 / bin_count as f64;
    for (order, (index, _)) in valid.iter().enumerate() {
        let bucket = ((order as f64 / group_size).floor() as usize).min(bin_count - 1);
        out[*index] = Value::from(bucket as u64);
    }
    out
}
