//! Declarative query workflow: step model and compiler.
//!
//! A workflow is an ordered list of steps (`filter` -> `join` ->
//! `transform` -> `view` -> `sort`) compiled from a snapshot of
//! visualization state. The payload wrapping it is the only wire contract
//! between the engine and a computation backend.

pub mod compiler;
mod join_plan;

pub use compiler::{
    add_filter_for_query, add_join_for_query, add_transform_for_query, change_dataset_for_query,
    process_expression, to_workflow, CompileError, CompileResult, CompiledWorkflow,
    ExpressionConfig, ViewSnapshot,
};

use serde::{Deserialize, Serialize};

use crate::model::{Expression, MeasureSpec, VisFilter};

/// Dataset id used when field metadata does not name one.
pub const DEFAULT_DATASET: &str = "default";

/// Sort direction for the terminal sort step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    None,
    Ascending,
    Descending,
}

/// A computed column appended by a transform step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTransform {
    pub key: String,
    pub expression: Expression,
}

/// Join kind. Only inner joins are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
}

/// One side of a pairwise foreign-key equality.
///
/// `alias` identifies the join path the dataset was reached through;
/// joined columns are namespaced `"{alias}.{fid}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKey {
    pub dataset: String,
    pub field: String,
    #[serde(rename = "as")]
    pub alias: String,
}

/// A pairwise dataset join on foreign-key equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    #[serde(rename = "type")]
    pub join_type: JoinType,
    pub keys: Vec<JoinKey>,
}

/// Terminal projection of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ViewQuery {
    /// Return rows unmodified, projected to `fields` (`*` means all).
    /// An empty field list is the "no-op / empty result" sentinel and
    /// short-circuits without reaching a backend.
    #[serde(rename = "raw")]
    Raw { fields: Vec<String> },

    /// One output row per group.
    #[serde(rename = "aggregate")]
    Aggregate {
        #[serde(rename = "groupBy")]
        group_by: Vec<String>,
        measures: Vec<MeasureSpec>,
    },
}

/// One stage of a compiled query pipeline. Order is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowStep {
    /// Row-level predicates, ANDed.
    #[serde(rename = "filter")]
    Filter { filters: Vec<VisFilter> },

    /// Pairwise inner joins combining rows from two or more datasets.
    #[serde(rename = "join")]
    Join { foreigns: Vec<JoinSpec> },

    /// Computed columns appended to the working row set.
    #[serde(rename = "transform")]
    Transform { transform: Vec<FieldTransform> },

    /// Terminal projection. At most one per workflow, always after
    /// filter/join/transform.
    #[serde(rename = "view")]
    View { query: Vec<ViewQuery> },

    /// Stable ordering of the view output.
    #[serde(rename = "sort")]
    Sort { by: Vec<String>, sort: SortOrder },
}

/// The unit of dispatch: a workflow plus result paging.
///
/// A payload is built fresh per query, never mutated after dispatch, and
/// discarded once the call settles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataQueryPayload {
    pub workflow: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Datasets the pipeline reads from; written by
    /// `change_dataset_for_query` when previewing a join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<String>>,
}

impl DataQueryPayload {
    pub fn new(workflow: Vec<WorkflowStep>) -> Self {
        Self {
            workflow,
            limit: None,
            offset: None,
            datasets: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_datasets(mut self, datasets: Vec<String>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    /// Whether the terminal view is the empty-raw sentinel, meaning the
    /// query must resolve to no rows without reaching a backend.
    pub fn is_empty_view(&self) -> bool {
        self.workflow.iter().any(|step| {
            matches!(
                step,
                WorkflowStep::View { query }
                    if query.len() == 1
                        && matches!(&query[0], ViewQuery::Raw { fields } if fields.is_empty())
            )
        })
    }
}
