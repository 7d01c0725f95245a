//! Compilation of visualization state into query workflows.
//!
//! All functions here are pure and synchronous: they consume a plain
//! snapshot of UI state (the reactive store owns the "current" state and
//! passes it in by value per call) and produce payload fragments. Nothing
//! is retained between calls, so an in-flight payload is never mutated by
//! later state changes.
//!
//! Step ordering: filtering before joining bounds join cost; joining
//! before transforming lets computed fields see joined columns;
//! transforming before the terminal view lets aggregation measures
//! reference computed fields.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::field::Field;
use crate::model::sql;
use crate::model::{Aggregator, Expression, FilterField, MeasureSpec, VisFilter};
use crate::route::RouteMap;

use super::join_plan::{plan_joins, FieldUse};
use super::{
    DataQueryPayload, FieldTransform, JoinSpec, SortOrder, ViewQuery, WorkflowStep,
};

/// Errors raised while compiling a workflow.
///
/// These are programming or validation errors: the caller is expected to
/// have validated field existence against its own metadata, so an unknown
/// field here fails fast instead of surfacing to end users.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unknown field: '{0}'")]
    UnknownField(String),

    #[error("duplicate field: '{0}'")]
    DuplicateField(String),

    #[error("field '{0}' has not been validated")]
    NotValidated(String),

    #[error("field '{field}' is in use by: {}", consumers.join(", "))]
    FieldInUse {
        field: String,
        consumers: Vec<String>,
    },

    #[error("cyclic computed-field dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("malformed SQL expression '{sql}': {message}")]
    MalformedSql { sql: String, message: String },

    #[error("'*' can only be aggregated with count, got {0}")]
    StarAggregate(Aggregator),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Context for resolving expressions against field metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionConfig {
    /// Display timezone offset in minutes, composed with each temporal
    /// field's own recorded offset.
    pub timezone_display_offset: Option<i32>,
}

/// A plain snapshot of the visualization state a workflow is compiled
/// from.
#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub filters: Vec<FilterField>,
    pub all_fields: Vec<Field>,
    pub view_dimensions: Vec<Field>,
    pub view_measures: Vec<Field>,
    pub default_aggregated: bool,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub timezone_display_offset: Option<i32>,
}

/// Output of `to_workflow`: the steps plus the datasets they read and the
/// datasets that could not be linked into the view.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWorkflow {
    pub steps: Vec<WorkflowStep>,
    pub datasets: Vec<String>,
    /// Datasets with no join route to the base dataset. Their fields are
    /// excluded from the compiled steps; this is a degraded-but-valid
    /// state for the UI, not an error.
    pub unlinked: Vec<String>,
}

impl CompiledWorkflow {
    /// Wrap the steps into a dispatchable payload.
    pub fn into_payload(self, limit: Option<usize>) -> DataQueryPayload {
        let mut payload = DataQueryPayload::new(self.steps);
        payload.limit = limit;
        if !self.datasets.is_empty() {
            payload.datasets = Some(self.datasets);
        }
        payload
    }
}

/// Assemble a full pipeline from UI state.
///
/// Produces, in order: a filter step over plain fields on the base
/// dataset, a join step when the view spans several datasets, a filter
/// step over joined plain fields, a transform step with the tree-shaken
/// and dependency-ordered computed fields, a filter step over computed
/// fields, the terminal view (`aggregate` when `default_aggregated` and
/// at least one measure is aggregated, or the view has dimensions only),
/// and a sort step when both a direction and a limit are set.
pub fn to_workflow(snapshot: &ViewSnapshot) -> CompileResult<CompiledWorkflow> {
    let index: HashMap<&str, &Field> = snapshot
        .all_fields
        .iter()
        .map(|f| (f.fid.as_str(), f))
        .collect();
    let config = ExpressionConfig {
        timezone_display_offset: snapshot.timezone_display_offset,
    };

    for field in snapshot
        .view_dimensions
        .iter()
        .chain(&snapshot.view_measures)
        .chain(snapshot.filters.iter().map(|f| &f.field))
    {
        if field.fid != "*" && !index.contains_key(field.fid.as_str()) {
            return Err(CompileError::UnknownField(field.fid.clone()));
        }
        if field.fid == "*" && field.agg.is_some() && field.agg != Some(Aggregator::Count) {
            return Err(CompileError::StarAggregate(field.agg.unwrap()));
        }
    }

    // Keys visible to the view, used to tree-shake computed fields.
    let view_keys: HashSet<String> = snapshot
        .view_dimensions
        .iter()
        .chain(&snapshot.view_measures)
        .map(|f| f.fid.clone())
        .chain(snapshot.filters.iter().map(|f| f.field.fid.clone()))
        .collect();

    let computed: Vec<(String, Expression)> = snapshot
        .all_fields
        .iter()
        .filter_map(|f| {
            f.expression
                .as_ref()
                .map(|e| (f.fid.clone(), e.clone()))
        })
        .collect();
    let transforms = ordered_transforms(&computed, &view_keys)?;

    // Multi-dataset planning over every field the steps will mention.
    let route_map = RouteMap::from_fields(&snapshot.all_fields);
    let mut uses: Vec<FieldUse> = Vec::new();
    let push_use = |uses: &mut Vec<FieldUse>, field: &Field| {
        let u = FieldUse {
            fid: field.fid.clone(),
            dataset: field.dataset.clone(),
            join_path: field.join_path.clone(),
        };
        if !uses.contains(&u) {
            uses.push(u);
        }
    };
    for field in snapshot
        .view_dimensions
        .iter()
        .chain(&snapshot.view_measures)
        .filter(|f| f.fid != "*")
    {
        push_use(&mut uses, field);
    }
    for filter in &snapshot.filters {
        push_use(&mut uses, &filter.field);
    }
    for t in &transforms {
        if let Some(field) = index.get(t.0.as_str()).copied() {
            push_use(&mut uses, field);
            for referenced in t.1.referenced_fields() {
                if let Some(dep) = index.get(referenced.as_str()).copied() {
                    push_use(&mut uses, dep);
                }
            }
        }
    }
    let plan = plan_joins(&uses, &route_map);

    let qualify = |field: &Field| -> Option<String> {
        if field.fid == "*" {
            return Some("*".to_string());
        }
        plan.qualify(field.dataset.as_deref(), &field.join_path, &field.fid)
    };

    let mut steps: Vec<WorkflowStep> = Vec::new();

    // 1. Filters on plain fields. Base-dataset filters run before the
    // join against raw ids; filters on joined fields run after it against
    // namespaced ids.
    let mut base_filters: Vec<VisFilter> = Vec::new();
    let mut joined_filters: Vec<VisFilter> = Vec::new();
    let mut computed_filters: Vec<VisFilter> = Vec::new();
    for filter in &snapshot.filters {
        let Some(rule) = filter.rule.clone() else {
            // A null rule means "no filter applied yet".
            continue;
        };
        let Some(qualified) = qualify(&filter.field) else {
            continue;
        };
        let vis = VisFilter {
            fid: qualified.clone(),
            rule,
        };
        if filter.field.is_computed() {
            computed_filters.push(vis);
        } else if plan.joined && qualified != filter.field.fid {
            // Namespaced id: only meaningful once the join ran. A base
            // field is namespaced too, so strip check is on the raw fid.
            if qualified == format!("{}.{}", crate::route::base_alias(), filter.field.fid) {
                base_filters.push(VisFilter {
                    fid: filter.field.fid.clone(),
                    rule: vis.rule,
                });
            } else {
                joined_filters.push(vis);
            }
        } else {
            base_filters.push(vis);
        }
    }
    if !base_filters.is_empty() {
        steps.push(WorkflowStep::Filter {
            filters: base_filters,
        });
    }

    // 2. Join.
    if plan.joined {
        steps.push(WorkflowStep::Join {
            foreigns: plan.foreign_keys.clone(),
        });
    }
    if !joined_filters.is_empty() {
        steps.push(WorkflowStep::Filter {
            filters: joined_filters,
        });
    }

    // 3. Transform: computed columns over filtered, joined data.
    if !transforms.is_empty() {
        let mut entries = Vec::with_capacity(transforms.len());
        for (key, expression) in &transforms {
            let processed = process_expression(expression, &snapshot.all_fields, &config)?;
            let Some(field) = index.get(key.as_str()).copied() else {
                return Err(CompileError::UnknownField(key.clone()));
            };
            let Some(qualified_key) = qualify(field) else {
                continue;
            };
            let rewritten = qualify_expression(&processed, &|fid| {
                index
                    .get(fid)
                    .copied()
                    .and_then(&qualify)
                    .filter(|q| q.as_str() != fid)
            })?;
            entries.push(FieldTransform {
                key: qualified_key,
                expression: rewritten,
            });
        }
        if !entries.is_empty() {
            steps.push(WorkflowStep::Transform { transform: entries });
        }
    }

    // 4. Filters on computed fields, after the transform that produces
    // them.
    if !computed_filters.is_empty() {
        steps.push(WorkflowStep::Filter {
            filters: computed_filters,
        });
    }

    // 5. Terminal view.
    let dims: Vec<String> = snapshot
        .view_dimensions
        .iter()
        .filter_map(|f| qualify(f))
        .collect();
    let meas: Vec<(&Field, String)> = snapshot
        .view_measures
        .iter()
        .filter_map(|f| qualify(f).map(|q| (f, q)))
        .collect();

    let aggregated = snapshot.default_aggregated
        && (meas.iter().any(|(f, _)| f.agg.is_some()) || (meas.is_empty() && !dims.is_empty()));

    let mut measure_keys: Vec<String> = Vec::new();
    if aggregated {
        let measures = meas
            .iter()
            .map(|(f, q)| {
                let agg = f.agg.unwrap_or(Aggregator::Sum);
                if q.as_str() == "*" && agg != Aggregator::Count {
                    return Err(CompileError::StarAggregate(agg));
                }
                let spec = MeasureSpec::new(q.clone(), agg);
                measure_keys.push(spec.as_field_key.clone());
                Ok(spec)
            })
            .collect::<CompileResult<Vec<_>>>()?;
        steps.push(WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: dims,
                measures,
            }],
        });
    } else {
        let mut fields: Vec<String> = Vec::new();
        for fid in dims.iter().chain(meas.iter().map(|(_, q)| q)) {
            if !fields.contains(fid) {
                fields.push(fid.clone());
            }
        }
        measure_keys = meas.iter().map(|(_, q)| q.clone()).collect();
        steps.push(WorkflowStep::View {
            query: vec![ViewQuery::Raw { fields }],
        });
    }

    // 6. Sort, only when the result is both ordered and truncated.
    if snapshot.sort != SortOrder::None && snapshot.limit.is_some() && !measure_keys.is_empty() {
        steps.push(WorkflowStep::Sort {
            by: measure_keys,
            sort: snapshot.sort,
        });
    }

    Ok(CompiledWorkflow {
        steps,
        datasets: plan.datasets.clone(),
        unlinked: plan.unlinked.clone(),
    })
}

/// Merge filters into a payload's filter step.
///
/// An existing filter step is extended rather than duplicated; when the
/// same `fid` appears on both sides the newly added rule replaces the old
/// one, so repeated calls compose like a single deduplicated call.
pub fn add_filter_for_query(payload: &DataQueryPayload, filters: &[VisFilter]) -> DataQueryPayload {
    if filters.is_empty() {
        return payload.clone();
    }
    let mut next = payload.clone();
    let position = next
        .workflow
        .iter()
        .position(|s| matches!(s, WorkflowStep::Filter { .. }));
    match position {
        Some(i) => {
            let WorkflowStep::Filter { filters: existing } = &next.workflow[i] else {
                unreachable!("position matched a filter step");
            };
            let mut merged: Vec<VisFilter> = filters.to_vec();
            for old in existing {
                if !merged.iter().any(|f| f.fid == old.fid) {
                    merged.push(old.clone());
                }
            }
            next.workflow[i] = WorkflowStep::Filter { filters: merged };
        }
        None => {
            next.workflow.insert(
                0,
                WorkflowStep::Filter {
                    filters: filters.to_vec(),
                },
            );
        }
    }
    next
}

/// Insert a join step after any leading filter steps and before
/// transform/view. An existing join step is extended with the specs it
/// does not already contain.
pub fn add_join_for_query(payload: &DataQueryPayload, joins: &[JoinSpec]) -> DataQueryPayload {
    if joins.is_empty() {
        return payload.clone();
    }
    let mut next = payload.clone();
    if let Some(WorkflowStep::Join { foreigns }) = next
        .workflow
        .iter_mut()
        .find(|s| matches!(s, WorkflowStep::Join { .. }))
    {
        for spec in joins {
            if !foreigns.contains(spec) {
                foreigns.push(spec.clone());
            }
        }
        return next;
    }
    let position = next
        .workflow
        .iter()
        .take_while(|s| matches!(s, WorkflowStep::Filter { .. }))
        .count();
    next.workflow.insert(
        position,
        WorkflowStep::Join {
            foreigns: joins.to_vec(),
        },
    );
    next
}

/// Append computed fields to the payload's transform step, keeping
/// dependencies ordered before dependents.
pub fn add_transform_for_query(
    payload: &DataQueryPayload,
    computed: &[FieldTransform],
) -> CompileResult<DataQueryPayload> {
    if computed.is_empty() {
        return Ok(payload.clone());
    }
    let mut next = payload.clone();
    if let Some(i) = next
        .workflow
        .iter()
        .position(|s| matches!(s, WorkflowStep::Transform { .. }))
    {
        let WorkflowStep::Transform { transform } = &next.workflow[i] else {
            unreachable!("position matched a transform step");
        };
        let mut merged: Vec<(String, Expression)> = computed
            .iter()
            .map(|t| (t.key.clone(), t.expression.clone()))
            .collect();
        for old in transform {
            if !merged.iter().any(|(k, _)| *k == old.key) {
                merged.push((old.key.clone(), old.expression.clone()));
            }
        }
        let keys: HashSet<String> = merged.iter().map(|(k, _)| k.clone()).collect();
        let ordered = ordered_transforms(&merged, &keys)?;
        next.workflow[i] = WorkflowStep::Transform {
            transform: ordered
                .into_iter()
                .map(|(key, expression)| FieldTransform { key, expression })
                .collect(),
        };
        return Ok(next);
    }

    let entries: Vec<(String, Expression)> = computed
        .iter()
        .map(|t| (t.key.clone(), t.expression.clone()))
        .collect();
    let keys: HashSet<String> = entries.iter().map(|(k, _)| k.clone()).collect();
    let ordered = ordered_transforms(&entries, &keys)?;
    let step = WorkflowStep::Transform {
        transform: ordered
            .into_iter()
            .map(|(key, expression)| FieldTransform { key, expression })
            .collect(),
    };
    let position = next
        .workflow
        .iter()
        .position(|s| matches!(s, WorkflowStep::View { .. } | WorkflowStep::Sort { .. }))
        .unwrap_or(next.workflow.len());
    next.workflow.insert(position, step);
    Ok(next)
}

/// Retarget which datasets the pipeline reads from, used when previewing
/// a join before it is committed.
pub fn change_dataset_for_query(
    payload: &DataQueryPayload,
    datasets: Vec<String>,
) -> DataQueryPayload {
    let mut next = payload.clone();
    next.datasets = Some(datasets);
    next
}

/// Resolve an expression's field references against current field
/// metadata, producing a backend-ready expression.
///
/// Date operations get an effective offset: the expression's own, else
/// the referenced field's recorded offset, else the caller's display
/// offset. SQL expressions are checked for syntax, display names are
/// substituted with field ids, and unknown identifiers are rejected.
pub fn process_expression(
    expression: &Expression,
    all_fields: &[Field],
    config: &ExpressionConfig,
) -> CompileResult<Expression> {
    let by_fid = |fid: &str| all_fields.iter().find(|f| f.fid == fid);

    let require = |fid: &str| -> CompileResult<&Field> {
        by_fid(fid).ok_or_else(|| CompileError::UnknownField(fid.to_string()))
    };

    match expression {
        Expression::Bin { field, bin_count } | Expression::BinCount { field, bin_count } => {
            require(field)?;
            if *bin_count == 0 {
                return Err(CompileError::InvalidExpression(
                    "bin count must be at least 1".to_string(),
                ));
            }
            Ok(expression.clone())
        }
        Expression::Log { field, base } => {
            require(field)?;
            if *base <= 0.0 || *base == 1.0 {
                return Err(CompileError::InvalidExpression(format!(
                    "invalid log base {}",
                    base
                )));
            }
            Ok(expression.clone())
        }
        Expression::DateTimeDrill {
            field,
            level,
            offset,
        } => {
            let meta = require(field)?;
            Ok(Expression::DateTimeDrill {
                field: field.clone(),
                level: *level,
                offset: offset
                    .or(meta.offset)
                    .or(config.timezone_display_offset),
            })
        }
        Expression::DateTimeFeature {
            field,
            level,
            offset,
        } => {
            let meta = require(field)?;
            Ok(Expression::DateTimeFeature {
                field: field.clone(),
                level: *level,
                offset: offset
                    .or(meta.offset)
                    .or(config.timezone_display_offset),
            })
        }
        Expression::One => Ok(Expression::One),
        Expression::Sql { sql: text } => {
            let referenced = sql::referenced_fields(text)?;
            let by_name = |name: &str| {
                all_fields
                    .iter()
                    .find(|f| f.fid == name || f.name == name)
            };
            for name in &referenced {
                if by_name(name).is_none() {
                    return Err(CompileError::UnknownField(name.clone()));
                }
            }
            let rewritten = sql::rename_fields(text, &|name| {
                by_name(name).map(|f| f.fid.clone())
            })?;
            Ok(Expression::Sql { sql: rewritten })
        }
    }
}

/// Rewrite an expression's field references through `rename` (used for
/// join namespacing). References for which `rename` returns `None` are
/// kept as-is.
fn qualify_expression(
    expression: &Expression,
    rename: &dyn Fn(&str) -> Option<String>,
) -> CompileResult<Expression> {
    let apply = |fid: &String| rename(fid).unwrap_or_else(|| fid.clone());
    Ok(match expression {
        Expression::Bin { field, bin_count } => Expression::Bin {
            field: apply(field),
            bin_count: *bin_count,
        },
        Expression::BinCount { field, bin_count } => Expression::BinCount {
            field: apply(field),
            bin_count: *bin_count,
        },
        Expression::Log { field, base } => Expression::Log {
            field: apply(field),
            base: *base,
        },
        Expression::DateTimeDrill {
            field,
            level,
            offset,
        } => Expression::DateTimeDrill {
            field: apply(field),
            level: *level,
            offset: *offset,
        },
        Expression::DateTimeFeature {
            field,
            level,
            offset,
        } => Expression::DateTimeFeature {
            field: apply(field),
            level: *level,
            offset: *offset,
        },
        Expression::One => Expression::One,
        Expression::Sql { sql: text } => Expression::Sql {
            sql: sql::rename_fields(text, rename)?,
        },
    })
}

/// Tree-shake computed fields down to the ones the view needs (directly
/// or through other computed fields), ordered dependencies-first.
fn ordered_transforms(
    computed: &[(String, Expression)],
    needed_keys: &HashSet<String>,
) -> CompileResult<Vec<(String, Expression)>> {
    let by_key: HashMap<&str, &Expression> =
        computed.iter().map(|(k, e)| (k.as_str(), e)).collect();

    // Closure over references: a computed field is included if the view
    // needs it or an included field references it.
    let mut included: Vec<String> = Vec::new();
    let mut pending: Vec<String> = computed
        .iter()
        .filter(|(k, _)| needed_keys.contains(k))
        .map(|(k, _)| k.clone())
        .collect();
    while let Some(key) = pending.pop() {
        if included.contains(&key) {
            continue;
        }
        if let Some(expr) = by_key.get(key.as_str()) {
            included.push(key);
            for referenced in expr.referenced_fields() {
                if by_key.contains_key(referenced.as_str()) {
                    pending.push(referenced);
                }
            }
        }
    }

    // Topological order by reference, not declaration order.
    let included_set: HashSet<&str> = included.iter().map(|s| s.as_str()).collect();
    let mut remaining: Vec<&str> = computed
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| included_set.contains(k))
        .collect();
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut result: Vec<(String, Expression)> = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|k| {
                by_key[k]
                    .referenced_fields()
                    .iter()
                    .all(|r| !included_set.contains(r.as_str()) || emitted.contains(r.as_str()))
            })
            .collect();
        if ready.is_empty() {
            let mut cycle: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
            cycle.sort();
            return Err(CompileError::CyclicDependency(cycle));
        }
        for key in &ready {
            emitted.insert(key);
            result.push((key.to_string(), (*by_key[key]).clone()));
        }
        remaining.retain(|k| !emitted.contains(k));
    }
    Ok(result)
}
