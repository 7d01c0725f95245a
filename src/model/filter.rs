//! Filter rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::field::Field;

/// A row-level predicate attached to a field.
///
/// `range` and `temporal range` bounds are inclusive. An empty `one of`
/// set means "no rows pass"; a missing rule (see [`FilterField`]) means
/// "no filter applied yet" and is never sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FilterRule {
    #[serde(rename = "one of")]
    OneOf { value: Vec<Value> },

    #[serde(rename = "not in")]
    NotIn { value: Vec<Value> },

    #[serde(rename = "range")]
    Range { value: [f64; 2] },

    #[serde(rename = "temporal range")]
    TemporalRange {
        /// Inclusive bounds in epoch milliseconds.
        value: [i64; 2],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i32>,
    },

    #[serde(rename = "regexp")]
    Regexp {
        value: String,
        #[serde(rename = "caseSensitive")]
        case_sensitive: bool,
    },
}

/// A field paired with its (possibly not yet configured) filter rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    #[serde(flatten)]
    pub field: Field,
    pub rule: Option<FilterRule>,
}

impl FilterField {
    pub fn new(field: Field, rule: FilterRule) -> Self {
        Self {
            field,
            rule: Some(rule),
        }
    }
}

/// The wire form of a configured filter: field id plus rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisFilter {
    pub fid: String,
    pub rule: FilterRule,
}
