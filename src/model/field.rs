//! Field descriptors for datasets and views.

use serde::{Deserialize, Serialize};

use super::expression::Expression;
use super::measure::Aggregator;
use crate::route::JoinPath;

/// Whether a field is grouped by (dimension) or aggregated over (measure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticType {
    Dimension,
    Measure,
}

/// The statistical data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Nominal,
    Ordinal,
    Quantitative,
    Temporal,
}

/// A foreign-key reference from one dataset's field to another's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Target dataset id.
    pub dataset: String,
    /// Target key field id.
    pub fid: String,
}

/// A column descriptor.
///
/// `fid` is the stable identifier used as the row key on the wire; `name`
/// is for display only. Derived fields carry an `expression` and reference
/// only fields that are visible at the point of computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub fid: String,
    pub name: String,
    #[serde(rename = "analyticType")]
    pub analytic_type: AnalyticType,
    #[serde(rename = "semanticType")]
    pub semantic_type: SemanticType,

    /// Owning dataset id, for multi-dataset views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// Foreign-key edge used to build the route map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign: Option<ForeignKey>,

    /// Join path selected for this field when the same dataset is reachable
    /// through more than one route (role-playing joins). Empty means "use
    /// the first discovered route".
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "joinPath")]
    pub join_path: Vec<JoinPath>,

    /// Derived-field definition; `Some` marks the field as computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,

    /// Recorded timezone offset in minutes, for temporal fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,

    /// Aggregator assigned to this field when it is used as a view measure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<Aggregator>,
}

impl Field {
    /// Create a plain (non-computed) field.
    pub fn new(
        fid: impl Into<String>,
        name: impl Into<String>,
        analytic_type: AnalyticType,
        semantic_type: SemanticType,
    ) -> Self {
        Self {
            fid: fid.into(),
            name: name.into(),
            analytic_type,
            semantic_type,
            dataset: None,
            foreign: None,
            join_path: Vec::new(),
            expression: None,
            offset: None,
            agg: None,
        }
    }

    /// Shorthand for a quantitative measure.
    pub fn measure(fid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(fid, name, AnalyticType::Measure, SemanticType::Quantitative)
    }

    /// Shorthand for a nominal dimension.
    pub fn dimension(fid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(fid, name, AnalyticType::Dimension, SemanticType::Nominal)
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_foreign(mut self, dataset: impl Into<String>, fid: impl Into<String>) -> Self {
        self.foreign = Some(ForeignKey {
            dataset: dataset.into(),
            fid: fid.into(),
        });
        self
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn with_agg(mut self, agg: Aggregator) -> Self {
        self.agg = Some(agg);
        self
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether this field's values are produced by an expression.
    pub fn is_computed(&self) -> bool {
        self.expression.is_some()
    }
}
