//! Engine data model: fields, expressions, filters, measures.

pub mod computed;
pub mod expression;
pub mod field;
pub mod filter;
pub mod measure;
pub mod sql;
pub mod temporal;

pub use computed::{ComputedFieldDef, ComputedFieldRegistry, ComputedFieldStage};
pub use expression::{DateTimeLevel, Expression};
pub use field::{AnalyticType, Field, ForeignKey, SemanticType};
pub use filter::{FilterField, FilterRule, VisFilter};
pub use measure::{Aggregator, MeasureSpec};
pub use temporal::{parse_timestamp, sniff_time_format, TimeFormat};

/// A result row: field id to value.
pub type Row = serde_json::Map<String, serde_json::Value>;
