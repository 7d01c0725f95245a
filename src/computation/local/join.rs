//! Inner joins across in-memory datasets.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::computation::{ComputationError, ComputationResult};
use crate::model::Row;
use crate::route::base_alias;
use crate::workflow::{JoinKey, JoinSpec};

use super::value::values_equal;

fn namespace(row: &Row, alias: &str) -> Row {
    row.iter()
        .map(|(k, v)| (format!("{}.{}", alias, k), v.clone()))
        .collect()
}

/// Execute the join specs against the named datasets.
///
/// `working` is the current (possibly pre-filtered) row set of the base
/// dataset; it is substituted wherever a key carries the base alias so
/// filters placed before the join keep their effect. Specs are expected
/// in linkable order: every spec after the first shares an alias with an
/// already-joined one.
pub(crate) fn apply(
    datasets: &HashMap<String, Vec<Row>>,
    working: &[Row],
    foreigns: &[JoinSpec],
) -> ComputationResult<Vec<Row>> {
    if foreigns.is_empty() {
        return Ok(working.to_vec());
    }

    // When no key uses the canonical base alias (hand-built specs), the
    // first listed key plays the base role.
    let canonical = base_alias();
    let base_like: String = if foreigns
        .iter()
        .flat_map(|s| &s.keys)
        .any(|k| k.alias == canonical)
    {
        canonical
    } else {
        foreigns[0].keys[0].alias.clone()
    };

    let rows_for = |key: &JoinKey| -> ComputationResult<Vec<Row>> {
        if key.alias == base_like {
            return Ok(working.to_vec());
        }
        datasets
            .get(&key.dataset)
            .cloned()
            .ok_or_else(|| ComputationError::UnknownDataset(key.dataset.clone()))
    };

    let mut joined: HashSet<String> = HashSet::new();
    let mut result: Option<Vec<Row>> = None;

    for spec in foreigns {
        if result.is_none() {
            let first = &spec.keys[0];
            result = Some(
                rows_for(first)?
                    .iter()
                    .map(|r| namespace(r, &first.alias))
                    .collect(),
            );
            joined.insert(first.alias.clone());
        }

        let Some(linked) = spec.keys.iter().find(|k| joined.contains(&k.alias)) else {
            return Err(ComputationError::UnlinkedJoin(
                spec.keys.iter().map(|k| k.alias.clone()).collect(),
            ));
        };
        let linked_column = format!("{}.{}", linked.alias, linked.field);

        for link in spec.keys.iter() {
            if joined.contains(&link.alias) {
                continue;
            }
            let link_rows = rows_for(link)?;
            let current = result.take().unwrap_or_default();
            let mut next: Vec<Row> = Vec::new();
            for row in &current {
                let key_value = row.get(&linked_column).unwrap_or(&Value::Null);
                for candidate in &link_rows {
                    let candidate_value = candidate.get(&link.field).unwrap_or(&Value::Null);
                    if values_equal(key_value, candidate_value) {
                        let mut merged = namespace(candidate, &link.alias);
                        for (k, v) in row {
                            merged.insert(k.clone(), v.clone());
                        }
                        next.push(merged);
                    }
                }
            }
            result = Some(next);
            joined.insert(link.alias.clone());
        }
    }

    Ok(result.unwrap_or_default())
}
