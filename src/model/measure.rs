//! Aggregation measures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregate function applied to a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Mean,
    Median,
    Count,
    Min,
    Max,
    Variance,
    Stdev,
}

impl Aggregator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Mean => "mean",
            Aggregator::Median => "median",
            Aggregator::Count => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Variance => "variance",
            Aggregator::Stdev => "stdev",
        }
    }

    /// Output key for aggregating `fid` with this function.
    pub fn agg_key(&self, fid: &str) -> String {
        format!("{}_{}", fid, self.as_str())
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measure within an aggregate view query.
///
/// `field` is `*` only together with `agg = count`, which counts rows.
/// Temporal measures carry a `format` and `offset` so min/max can parse
/// their values before comparing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub field: String,
    pub agg: Aggregator,
    #[serde(rename = "asFieldKey")]
    pub as_field_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
}

impl MeasureSpec {
    pub fn new(field: impl Into<String>, agg: Aggregator) -> Self {
        let field = field.into();
        let as_field_key = agg.agg_key(&field);
        Self {
            field,
            agg,
            as_field_key,
            format: None,
            offset: None,
        }
    }

    /// The row-count measure: `count` over `*`.
    pub fn count_star(as_field_key: impl Into<String>) -> Self {
        Self {
            field: "*".to_string(),
            agg: Aggregator::Count,
            as_field_key: as_field_key.into(),
            format: None,
            offset: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.as_field_key = key.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>, offset: Option<i32>) -> Self {
        self.format = Some(format.into());
        self.offset = offset;
        self
    }
}
