//! Derived-field expression model.
//!
//! Expressions describe how a computed column is produced from other
//! columns. They are a closed union so the compiler and both backends can
//! be checked for exhaustiveness; the free-form `expr` variant carries an
//! opaque SQL-like string that only the executing backend evaluates.

use serde::{Deserialize, Serialize};

/// Calendar component extracted by a date-time drill or feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateTimeLevel {
    Year,
    Quarter,
    Month,
    Week,
    IsoYear,
    IsoWeek,
    Weekday,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateTimeLevel {
    /// Drill levels produce order-comparable values; feature levels (like
    /// weekday) do not need to.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, DateTimeLevel::Weekday)
    }
}

/// How a derived field is computed from others.
///
/// Every variant carries enough parameters to be re-derived
/// deterministically from its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Expression {
    /// Partition a quantitative field into `bin_count` equal-width buckets.
    #[serde(rename = "bin")]
    Bin {
        field: String,
        #[serde(rename = "binCount")]
        bin_count: usize,
    },

    /// Partition a quantitative field into `bin_count` equal-frequency
    /// buckets.
    #[serde(rename = "binCount")]
    BinCount {
        field: String,
        #[serde(rename = "binCount")]
        bin_count: usize,
    },

    /// Logarithm of the field in the given base. Values <= 0 have no
    /// defined result and become null.
    #[serde(rename = "log")]
    Log { field: String, base: f64 },

    /// Extract an order-preserving calendar component.
    #[serde(rename = "dateTimeDrill")]
    DateTimeDrill {
        field: String,
        level: DateTimeLevel,
        /// Display timezone offset in minutes; resolved by
        /// `process_expression` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i32>,
    },

    /// Extract a non-monotonic calendar feature (e.g. weekday).
    #[serde(rename = "dateTimeFeature")]
    DateTimeFeature {
        field: String,
        level: DateTimeLevel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i32>,
    },

    /// A constant-1 column, used for row counting through `sum`.
    #[serde(rename = "one")]
    One,

    /// A free-form SQL-like computed column. The engine validates syntax
    /// and substitutes identifiers; evaluation belongs to the backend.
    #[serde(rename = "expr")]
    Sql { sql: String },
}

impl Expression {
    /// Field ids this expression reads directly.
    ///
    /// For the `expr` variant the references come from parsing the SQL
    /// text; a string that fails to parse contributes no references (it is
    /// rejected later by `process_expression`).
    pub fn referenced_fields(&self) -> Vec<String> {
        match self {
            Expression::Bin { field, .. }
            | Expression::BinCount { field, .. }
            | Expression::Log { field, .. }
            | Expression::DateTimeDrill { field, .. }
            | Expression::DateTimeFeature { field, .. } => vec![field.clone()],
            Expression::One => Vec::new(),
            Expression::Sql { sql } => super::sql::referenced_fields(sql).unwrap_or_default(),
        }
    }
}
