//! Terminal view queries: raw projection, aggregation, sorting.

use std::collections::HashMap;

use serde_json::Value;

use crate::computation::ComputationResult;
use crate::model::temporal::parse_timestamp;
use crate::model::{Aggregator, MeasureSpec, Row};
use crate::workflow::{SortOrder, ViewQuery};

use super::stat;
use super::value::{as_f64, compare, from_f64};

/// Execute one view query over the working row set.
pub(crate) fn apply(rows: Vec<Row>, query: &ViewQuery) -> ComputationResult<Vec<Row>> {
    match query {
        ViewQuery::Raw { fields } => Ok(raw(rows, fields)),
        ViewQuery::Aggregate { group_by, measures } => Ok(aggregate(rows, group_by, measures)),
    }
}

fn raw(rows: Vec<Row>, fields: &[String]) -> Vec<Row> {
    if fields.is_empty() {
        return Vec::new();
    }
    if fields.iter().any(|f| f == "*") {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            fields
                .iter()
                .map(|f| (f.clone(), row.get(f).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

fn aggregate(rows: Vec<Row>, group_by: &[String], measures: &[MeasureSpec]) -> Vec<Row> {
    // Groups keep first-appearance order so ties in a later sort are
    // stable with respect to input order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key_values: Vec<&Value> = group_by
            .iter()
            .map(|k| row.get(k).unwrap_or(&Value::Null))
            .collect();
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                Vec::new()
            })
            .push(i);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let members = &groups[&key];
        let first = &rows[members[0]];
        let mut row = Row::new();
        for k in group_by {
            row.insert(k.clone(), first.get(k).cloned().unwrap_or(Value::Null));
        }
        for measure in measures {
            row.insert(
                measure.as_field_key.clone(),
                aggregate_measure(&rows, members, measure),
            );
        }
        out.push(row);
    }
    out
}

fn aggregate_measure(rows: &[Row], members: &[usize], measure: &MeasureSpec) -> Value {
    if measure.field == "*" {
        // `*` is only valid with count: the size of the group.
        return Value::from(members.len() as u64);
    }
    let nums: Vec<f64> = members
        .iter()
        .filter_map(|i| {
            let value = rows[*i].get(&measure.field)?;
            if measure.format.is_some() {
                parse_timestamp(value).map(|ms| ms as f64)
            } else {
                as_f64(value)
            }
        })
        .collect();
    match measure.agg {
        Aggregator::Count => Value::from(nums.len() as u64),
        Aggregator::Sum => from_f64(stat::sum(&nums)),
        Aggregator::Mean => stat::mean(&nums).map(from_f64).unwrap_or(Value::Null),
        Aggregator::Median => stat::median(&nums).map(from_f64).unwrap_or(Value::Null),
        Aggregator::Min => stat::min(&nums).map(from_f64).unwrap_or(Value::Null),
        Aggregator::Max => stat::max(&nums).map(from_f64).unwrap_or(Value::Null),
        Aggregator::Variance => stat::variance(&nums).map(from_f64).unwrap_or(Value::Null),
        Aggregator::Stdev => stat::stdev(&nums).map(from_f64).unwrap_or(Value::Null),
    }
}

/// Stable multi-key sort; ties preserve input order.
pub(crate) fn sort(mut rows: Vec<Row>, by: &[String], order: SortOrder) -> Vec<Row> {
    if by.is_empty() || order == SortOrder::None {
        return rows;
    }
    rows.sort_by(|a, b| {
        let mut result = std::cmp::Ordering::Equal;
        for key in by {
            let x = a.get(key).unwrap_or(&Value::Null);
            let y = b.get(key).unwrap_or(&Value::Null);
            result = compare(x, y);
            if result != std::cmp::Ordering::Equal {
                break;
            }
        }
        if order == SortOrder::Descending {
            result.reverse()
        } else {
            result
        }
    });
    rows
}
