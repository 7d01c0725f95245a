//! Multi-dataset join assembly.
//!
//! When the fields of a view span more than one dataset, the compiler
//! picks a base dataset, walks every used field's join path back to it,
//! and emits one inner-join foreign key per distinct path suffix. Each
//! suffix is identified by its alias; rewriting a field id to
//! `"{alias}.{fid}"` attaches it to the right occurrence of its dataset
//! (the same dataset can be joined more than once through different
//! paths).

use std::collections::{HashMap, HashSet};

use crate::route::{merge_paths, path_alias, reverse_paths, JoinPath, RouteMap};

use super::{JoinKey, JoinSpec, JoinType, DEFAULT_DATASET};

/// One occurrence of a field in the compiled view.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldUse {
    pub fid: String,
    pub dataset: Option<String>,
    pub join_path: Vec<JoinPath>,
}

impl FieldUse {
    fn dataset_or_default(&self) -> &str {
        self.dataset.as_deref().unwrap_or(DEFAULT_DATASET)
    }

    fn key(&self) -> (String, String, String) {
        (
            self.dataset_or_default().to_string(),
            path_alias(&self.join_path),
            self.fid.clone(),
        )
    }
}

/// The assembled join plan plus the per-field id rewrites it implies.
#[derive(Debug, Default)]
pub(crate) struct JoinPlan {
    /// Whether more than one dataset is involved (ids get rewritten).
    pub joined: bool,
    pub foreign_keys: Vec<JoinSpec>,
    pub datasets: Vec<String>,
    /// Datasets with no route to the base dataset; their fields are
    /// excluded from compilation.
    pub unlinked: Vec<String>,
    qualified: HashMap<(String, String, String), Option<String>>,
}

impl JoinPlan {
    /// Rewritten id for a field occurrence. `None` means the field's
    /// dataset is unlinked and the field must be dropped.
    pub fn qualify(&self, dataset: Option<&str>, join_path: &[JoinPath], fid: &str) -> Option<String> {
        let key = (
            dataset.unwrap_or(DEFAULT_DATASET).to_string(),
            path_alias(join_path),
            fid.to_string(),
        );
        if let Some(entry) = self.qualified.get(&key) {
            return entry.clone();
        }
        if !self.joined {
            return Some(fid.to_string());
        }
        None
    }
}

/// Assemble the join plan for a set of field uses.
pub(crate) fn plan_joins(uses: &[FieldUse], route_map: &RouteMap) -> JoinPlan {
    if uses.is_empty() {
        return JoinPlan::default();
    }

    // The base dataset is the lexicographically first endpoint, so the
    // choice is stable across recompilations of the same view.
    let mut endpoints: Vec<(&str, &[JoinPath])> = uses
        .iter()
        .map(|u| (u.dataset_or_default(), u.join_path.as_slice()))
        .collect();
    endpoints.sort_by_key(|(dataset, path)| (dataset.to_string(), path_alias(path)));
    let (base_dataset, base_path) = endpoints[0];
    let base_reversed = reverse_paths(base_path);

    let mut plan = JoinPlan::default();
    let mut joined_aliases: HashSet<String> = HashSet::new();
    joined_aliases.insert(path_alias(&[]));
    let mut used_datasets: Vec<String> = vec![base_dataset.to_string()];
    let mut unlinked: HashSet<String> = HashSet::new();

    for field_use in uses {
        let dataset = field_use.dataset_or_default();
        let own_path: Option<Vec<JoinPath>> = if !field_use.join_path.is_empty() {
            Some(field_use.join_path.clone())
        } else if dataset != base_dataset {
            route_map.route(dataset, base_dataset)
        } else {
            Some(Vec::new())
        };

        let Some(own_path) = own_path else {
            unlinked.insert(dataset.to_string());
            plan.qualified.insert(field_use.key(), None);
            continue;
        };

        let mut full = own_path;
        full.extend(base_reversed.iter().cloned());
        let actual = merge_paths(&full);

        for start in 0..actual.len() {
            let suffix = &actual[start..];
            let alias = path_alias(suffix);
            if !joined_aliases.insert(alias.clone()) {
                continue;
            }
            let edge = &suffix[0];
            for d in [&edge.from, &edge.to] {
                if !used_datasets.contains(d) {
                    used_datasets.push(d.clone());
                }
            }
            plan.foreign_keys.push(JoinSpec {
                join_type: JoinType::Inner,
                keys: vec![
                    JoinKey {
                        dataset: edge.from.clone(),
                        field: edge.fid.clone(),
                        alias,
                    },
                    JoinKey {
                        dataset: edge.to.clone(),
                        field: edge.tid.clone(),
                        alias: path_alias(&suffix[1..]),
                    },
                ],
            });
        }

        let qualified = format!("{}.{}", path_alias(&actual), field_use.fid);
        plan.qualified.insert(field_use.key(), Some(qualified));
    }

    plan.unlinked = {
        let mut v: Vec<String> = unlinked.into_iter().collect();
        v.sort();
        v
    };

    if used_datasets.len() > 1 {
        plan.joined = true;
        plan.foreign_keys = sort_foreign_keys(plan.foreign_keys);
        plan.datasets = used_datasets;
    } else {
        plan.joined = false;
        plan.foreign_keys.clear();
        plan.datasets = used_datasets;
        // Identity rewrites when no join is emitted; unlinked entries
        // stay excluded.
        for ((_, _, fid), value) in plan.qualified.iter_mut() {
            if value.is_some() {
                *value = Some(fid.clone());
            }
        }
    }

    plan
}

/// Order foreign keys so every spec after the first shares an alias with
/// an already-joined one, and that shared key comes first in the pair.
fn sort_foreign_keys(keys: Vec<JoinSpec>) -> Vec<JoinSpec> {
    if keys.is_empty() {
        return keys;
    }
    let mut reached: HashSet<String> = HashSet::new();
    reached.insert(keys[0].keys[0].alias.clone());
    let mut queue: Vec<JoinSpec> = keys;
    let mut result: Vec<JoinSpec> = Vec::new();
    let mut stalled: Option<JoinSpec> = None;

    while !queue.is_empty() {
        let item = queue.remove(0);
        if let Some(pos) = item.keys.iter().position(|k| reached.contains(&k.alias)) {
            for k in &item.keys {
                reached.insert(k.alias.clone());
            }
            let mut ordered = item.keys.clone();
            let linked = ordered.remove(pos);
            ordered.insert(0, linked);
            result.push(JoinSpec {
                join_type: item.join_type,
                keys: ordered,
            });
            stalled = None;
        } else {
            if stalled.as_ref() == Some(&item) {
                // Disconnected remainder; emit as-is rather than loop.
                result.push(item);
                result.extend(queue.drain(..));
                break;
            }
            stalled = Some(item.clone());
            queue.push(item);
        }
    }
    result
}
