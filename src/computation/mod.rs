//! The computation contract and its backends.
//!
//! A backend is anything that can execute a [`DataQueryPayload`] and
//! return rows. The trait is the single boundary between the engine and
//! an execution backend; the engine never retries, never sequences calls,
//! and keeps no state across dispatches, so independent queries can be in
//! flight concurrently without coordination.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Workflow Compiler (pure)                 │
//! └──────────────────────────────────────────────────────────┘
//!                            │ DataQueryPayload
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │            ComputationBackend::query (async)             │
//! │   LocalBackend (in-memory)  │  ServiceBackend (NDJSON)   │
//! └──────────────────────────────────────────────────────────┘
//!                            │ Vec<Row>
//!                            ▼
//!              statistics layer / renderer
//! ```

pub mod error;
pub mod local;
pub mod remote;
mod wrappers;

pub use error::{ComputationError, ComputationResult};
pub use local::LocalBackend;
pub use remote::ServiceBackend;
pub use wrappers::{with_error_report, with_timeout, ErrorReportBackend, TimeoutBackend};

use async_trait::async_trait;

use crate::model::Row;
use crate::workflow::DataQueryPayload;

/// A pluggable executor for compiled query payloads.
#[async_trait]
pub trait ComputationBackend: Send + Sync {
    /// Execute one payload and return its rows.
    ///
    /// One request, one response. Retry policy, if any, belongs to the
    /// implementation, not to callers.
    async fn query(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>>;
}

/// Dispatch a payload, short-circuiting the empty-view sentinel.
///
/// A `raw` view with an empty field list resolves to no rows without the
/// backend ever being invoked.
pub async fn data_query(
    backend: &dyn ComputationBackend,
    payload: &DataQueryPayload,
) -> ComputationResult<Vec<Row>> {
    if payload.is_empty_view() {
        return Ok(Vec::new());
    }
    backend.query(payload).await
}
