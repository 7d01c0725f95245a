//! In-memory computation backend.
//!
//! Holds named datasets as plain row vectors and implements every step
//! and expression kind of the workflow model. Evaluation runs on a
//! blocking thread so large datasets do not stall the async executor;
//! callers only ever see the `payload -> rows` contract.

mod filter;
mod join;
mod sql_eval;
mod stat;
mod transform;
mod value;
mod view;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::Row;
use crate::workflow::{DataQueryPayload, WorkflowStep, DEFAULT_DATASET};

use super::{ComputationBackend, ComputationError, ComputationResult};

/// A computation backend over in-memory row sets.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    datasets: Arc<HashMap<String, Vec<Row>>>,
    default_dataset: String,
}

impl LocalBackend {
    /// Single-dataset backend under the default dataset id.
    pub fn new(rows: Vec<Row>) -> Self {
        let mut datasets = HashMap::new();
        datasets.insert(DEFAULT_DATASET.to_string(), rows);
        Self {
            datasets: Arc::new(datasets),
            default_dataset: DEFAULT_DATASET.to_string(),
        }
    }

    /// Multi-dataset backend. The first id in iteration order of
    /// `datasets` is not meaningful; pass the base via payload datasets
    /// or rely on the join step.
    pub fn from_datasets(
        datasets: HashMap<String, Vec<Row>>,
        default_dataset: impl Into<String>,
    ) -> Self {
        Self {
            datasets: Arc::new(datasets),
            default_dataset: default_dataset.into(),
        }
    }

    fn initial_rows(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        let name = payload
            .datasets
            .as_ref()
            .and_then(|d| d.first().cloned())
            .or_else(|| {
                payload.workflow.iter().find_map(|s| match s {
                    WorkflowStep::Join { foreigns } => foreigns
                        .first()
                        .and_then(|f| f.keys.first())
                        .map(|k| k.dataset.clone()),
                    _ => None,
                })
            })
            .unwrap_or_else(|| self.default_dataset.clone());
        self.datasets
            .get(&name)
            .cloned()
            .ok_or(ComputationError::UnknownDataset(name))
    }

    fn execute(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        let mut rows = self.initial_rows(payload)?;
        for step in &payload.workflow {
            rows = match step {
                WorkflowStep::Filter { filters } => filter::apply(rows, filters)?,
                WorkflowStep::Join { foreigns } => {
                    join::apply(&self.datasets, &rows, foreigns)?
                }
                WorkflowStep::Transform { transform } => transform::apply(rows, transform)?,
                WorkflowStep::View { query } => {
                    let mut current = rows;
                    for q in query {
                        current = view::apply(current, q)?;
                    }
                    current
                }
                WorkflowStep::Sort { by, sort } => view::sort(rows, by, *sort),
            };
        }

        let start = payload.offset.unwrap_or(0).min(rows.len());
        let end = payload
            .limit
            .map(|l| (start + l).min(rows.len()))
            .unwrap_or(rows.len());
        Ok(rows[start..end].to_vec())
    }
}

#[async_trait]
impl ComputationBackend for LocalBackend {
    async fn query(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        let backend = self.clone();
        let payload = payload.clone();
        tokio::task::spawn_blocking(move || backend.execute(&payload))
            .await
            .map_err(|_| ComputationError::ChannelClosed)?
    }
}
