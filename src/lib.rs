//! # Vizflow
//!
//! A backend-agnostic data query workflow engine for interactive visual
//! analytics.
//!
//! ## Architecture
//!
//! Visualization state (encodings, filters, computed fields, join
//! selections) is compiled into a declarative, ordered pipeline and
//! dispatched through a single pluggable computation boundary:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        UI State (dimensions, measures, filters)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [workflow compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │   DataQueryPayload (filter → join → transform → view)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [computation backend]
//! ┌─────────────────────────────────────────────────────────┐
//! │   LocalBackend (in-memory)  │  ServiceBackend (NDJSON)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        rows → statistics / pagination / renderer        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The compiler is pure and stateless; backends are swapped by dependency
//! injection behind the [`computation::ComputationBackend`] trait; the
//! statistics layer composes compiler primitives and guards against stale
//! responses with a generation counter.

pub mod computation;
pub mod config;
pub mod model;
pub mod route;
pub mod stats;
pub mod workflow;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::computation::{
        data_query, with_error_report, with_timeout, ComputationBackend, ComputationError,
        ComputationResult, LocalBackend, ServiceBackend,
    };
    pub use crate::model::{
        Aggregator, AnalyticType, DateTimeLevel, Expression, Field, FilterField, FilterRule,
        MeasureSpec, Row, SemanticType, VisFilter,
    };
    pub use crate::route::{JoinPath, RouteMap};
    pub use crate::stats::{
        data_read_raw, dataset_stats, field_stat, get_range, get_temporal_range,
        GenerationTracker,
    };
    pub use crate::workflow::{
        add_filter_for_query, add_join_for_query, add_transform_for_query,
        change_dataset_for_query, process_expression, to_workflow, DataQueryPayload, SortOrder,
        ViewQuery, ViewSnapshot, WorkflowStep,
    };
}

// Also export the payload types at the crate root for convenience.
pub use model::Row;
pub use workflow::{DataQueryPayload, WorkflowStep};
