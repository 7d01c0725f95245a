//! Row filtering.

use regex::RegexBuilder;
use serde_json::Value;

use crate::computation::{ComputationError, ComputationResult};
use crate::model::temporal::parse_timestamp;
use crate::model::{FilterRule, Row, VisFilter};

use super::value::{as_f64, to_text, values_equal};

enum CompiledRule {
    OneOf(Vec<Value>),
    NotIn(Vec<Value>),
    Range(f64, f64),
    TemporalRange(i64, i64),
    Regexp(regex::Regex),
}

fn compile(rule: &FilterRule) -> ComputationResult<CompiledRule> {
    Ok(match rule {
        FilterRule::OneOf { value } => CompiledRule::OneOf(value.clone()),
        FilterRule::NotIn { value } => CompiledRule::NotIn(value.clone()),
        FilterRule::Range { value } => CompiledRule::Range(value[0], value[1]),
        FilterRule::TemporalRange { value, .. } => CompiledRule::TemporalRange(value[0], value[1]),
        FilterRule::Regexp {
            value,
            case_sensitive,
        } => CompiledRule::Regexp(
            RegexBuilder::new(value)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| ComputationError::InvalidFilter(e.to_string()))?,
        ),
    })
}

impl CompiledRule {
    fn matches(&self, value: &Value) -> bool {
        match self {
            CompiledRule::OneOf(values) => values.iter().any(|v| values_equal(v, value)),
            CompiledRule::NotIn(values) => !values.iter().any(|v| values_equal(v, value)),
            CompiledRule::Range(lo, hi) => {
                as_f64(value).map(|v| *lo <= v && v <= *hi).unwrap_or(false)
            }
            CompiledRule::TemporalRange(lo, hi) => parse_timestamp(value)
                .map(|t| *lo <= t && t <= *hi)
                .unwrap_or(false),
            CompiledRule::Regexp(re) => re.is_match(&to_text(value)),
        }
    }
}

/// Keep rows matching every filter (rules are ANDed).
pub(crate) fn apply(rows: Vec<Row>, filters: &[VisFilter]) -> ComputationResult<Vec<Row>> {
    if filters.is_empty() {
        return Ok(rows);
    }
    let compiled: Vec<(&str, CompiledRule)> = filters
        .iter()
        .map(|f| compile(&f.rule).map(|rule| (f.fid.as_str(), rule)))
        .collect::<ComputationResult<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .filter(|row| {
            compiled.iter().all(|(fid, rule)| {
                let value = row.get(*fid).unwrap_or(&Value::Null);
                rule.matches(value)
            })
        })
        .collect())
}
