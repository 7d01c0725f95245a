//! Backend decorators: wall-clock budgets and error reporting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::Row;
use crate::workflow::DataQueryPayload;

use super::{ComputationBackend, ComputationError, ComputationResult};

/// A backend wrapped with a per-call wall-clock budget.
///
/// On expiry the call rejects with [`ComputationError::Timeout`]; the
/// underlying future is dropped, not cancelled on the backend side, so a
/// late result is simply unobserved (or discarded by the caller's
/// generation check).
pub struct TimeoutBackend<B> {
    inner: B,
    budget: Duration,
}

/// Race a backend against a timer.
pub fn with_timeout<B: ComputationBackend>(backend: B, budget: Duration) -> TimeoutBackend<B> {
    TimeoutBackend {
        inner: backend,
        budget,
    }
}

#[async_trait]
impl<B: ComputationBackend> ComputationBackend for TimeoutBackend<B> {
    async fn query(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        match tokio::time::timeout(self.budget, self.inner.query(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ComputationError::Timeout(self.budget)),
        }
    }
}

/// A backend that reports every error to a hook before re-propagating it.
///
/// The error is never swallowed: a single failure can update UI state via
/// the hook and still reject the caller's future, so concurrent callers
/// can aggregate errors the usual way (first rejection wins).
pub struct ErrorReportBackend<B> {
    inner: B,
    on_error: Arc<dyn Fn(&ComputationError) + Send + Sync>,
}

/// Observe errors without altering propagation.
pub fn with_error_report<B, F>(backend: B, on_error: F) -> ErrorReportBackend<B>
where
    B: ComputationBackend,
    F: Fn(&ComputationError) + Send + Sync + 'static,
{
    ErrorReportBackend {
        inner: backend,
        on_error: Arc::new(on_error),
    }
}

#[async_trait]
impl<B: ComputationBackend> ComputationBackend for ErrorReportBackend<B> {
    async fn query(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        match self.inner.query(payload).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                (self.on_error)(&err);
                Err(err)
            }
        }
    }
}
