//! Derived statistics and paged reads.
//!
//! Everything here composes the workflow primitives and dispatches them
//! through a [`ComputationBackend`]; nothing talks to data directly.
//! Independent halves of a statistic are issued concurrently, and errors
//! aggregate the standard way: the first rejection wins.

mod generation;

pub use generation::{Generation, GenerationTracker};

use futures::try_join;
use serde_json::Value;
use thiserror::Error;

use crate::computation::{data_query, ComputationBackend, ComputationError};
use crate::model::temporal::{parse_timestamp, sniff_time_format, TimeFormat};
use crate::model::{
    Aggregator, Expression, Field, FilterRule, MeasureSpec, Row, VisFilter,
};
use crate::workflow::{
    process_expression, CompileError, DataQueryPayload, ExpressionConfig, FieldTransform,
    SortOrder, ViewQuery, WorkflowStep,
};

/// Errors from the statistics layer: either the tiny compile step that
/// prepares a computed field, or the backend call itself.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Computation(#[from] ComputationError),
}

pub type StatsResult<T> = Result<T, StatsError>;

/// Whole-dataset statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    pub row_count: u64,
}

/// One distinct value and how many rows carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCount {
    pub value: Value,
    pub count: u64,
}

/// Cardinality metadata of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValuesMeta {
    /// Total row count.
    pub total: u64,
    /// Number of distinct values.
    pub distinct_total: u64,
}

/// Result of [`field_stat`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    pub values: Vec<ValueCount>,
    pub values_meta: ValuesMeta,
    pub range: (Value, Value),
    pub selected_count: u64,
}

/// Ordering of distinct-value listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueSortOrder {
    #[default]
    None,
    ValueAsc,
    ValueDesc,
    CountAsc,
    CountDesc,
}

/// A search keyword applied as a regexp pre-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub pattern: String,
    pub case_sensitive: bool,
    /// Match whole words only.
    pub word: bool,
}

impl Keyword {
    fn to_rule(&self) -> FilterRule {
        let pattern = if self.word {
            format!(r"\b(?:{})\b", self.pattern)
        } else {
            self.pattern.clone()
        };
        FilterRule::Regexp {
            value: pattern,
            case_sensitive: self.case_sensitive,
        }
    }
}

/// Options for [`field_stat`]. Every half is individually skippable.
#[derive(Debug, Clone, Default)]
pub struct FieldStatOptions {
    pub values: bool,
    pub range: bool,
    pub values_meta: bool,
    /// Values whose filtered row count is requested.
    pub selected: Vec<Value>,
    pub sort_by: ValueSortOrder,
    pub values_limit: Option<usize>,
    pub values_offset: Option<usize>,
    pub keyword: Option<Keyword>,
    pub timezone_display_offset: Option<i32>,
}

impl FieldStatOptions {
    /// Everything on, nothing paged.
    pub fn all() -> Self {
        Self {
            values: true,
            range: true,
            values_meta: true,
            ..Self::default()
        }
    }
}

/// Sorting of a paged raw read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSorting {
    pub fid: String,
    pub sort: SortOrder,
}

/// Options for [`data_read_raw`].
#[derive(Debug, Clone, Default)]
pub struct ReadRawOptions {
    pub sorting: Option<RawSorting>,
    /// The same filters the caller uses for its count query, so page
    /// totals stay consistent with the count.
    pub filters: Vec<VisFilter>,
}

fn count_of(row: Option<&Row>, key: &str) -> u64 {
    row.and_then(|r| r.get(key))
        .and_then(|v| v.as_f64())
        .map(|f| f as u64)
        .unwrap_or(0)
}

/// Total row count of the dataset.
pub async fn dataset_stats(backend: &dyn ComputationBackend) -> StatsResult<DatasetStats> {
    let payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: Vec::new(),
            measures: vec![MeasureSpec::count_star("count")],
        }],
    }]);
    let rows = data_query(backend, &payload).await?;
    Ok(DatasetStats {
        row_count: count_of(rows.first(), "count"),
    })
}

/// Distinct values, cardinality, range and selected-count of one field,
/// fetched concurrently. Computed fields get their transform step
/// prepended to every sub-query.
pub async fn field_stat(
    backend: &dyn ComputationBackend,
    field: &Field,
    options: &FieldStatOptions,
    all_fields: &[Field],
) -> StatsResult<FieldStats> {
    let fid = &field.fid;
    let count_id = format!("count_{}", fid);
    let total_distinct_id = format!("total_distinct_{}", fid);
    let min_id = format!("min_{}", fid);
    let max_id = format!("max_{}", fid);

    let transform_work: Vec<WorkflowStep> = match &field.expression {
        Some(expression) => {
            let processed = process_expression(
                expression,
                all_fields,
                &ExpressionConfig {
                    timezone_display_offset: options.timezone_display_offset,
                },
            )?;
            vec![WorkflowStep::Transform {
                transform: vec![FieldTransform {
                    key: fid.clone(),
                    expression: processed,
                }],
            }]
        }
        None => Vec::new(),
    };
    let filter_work: Vec<WorkflowStep> = match &options.keyword {
        Some(keyword) => vec![WorkflowStep::Filter {
            filters: vec![VisFilter {
                fid: fid.clone(),
                rule: keyword.to_rule(),
            }],
        }],
        None => Vec::new(),
    };

    let grouped_counts = ViewQuery::Aggregate {
        group_by: vec![fid.clone()],
        measures: vec![MeasureSpec::count_star(&count_id)],
    };

    let values_payload = {
        let mut workflow = Vec::new();
        workflow.extend(transform_work.iter().cloned());
        workflow.extend(filter_work.iter().cloned());
        workflow.push(WorkflowStep::View {
            query: vec![grouped_counts.clone()],
        });
        match options.sort_by {
            ValueSortOrder::None => {}
            sort_by => {
                let (by, sort) = match sort_by {
                    ValueSortOrder::ValueAsc => (fid.clone(), SortOrder::Ascending),
                    ValueSortOrder::ValueDesc => (fid.clone(), SortOrder::Descending),
                    ValueSortOrder::CountAsc => (count_id.clone(), SortOrder::Ascending),
                    ValueSortOrder::CountDesc => (count_id.clone(), SortOrder::Descending),
                    ValueSortOrder::None => unreachable!(),
                };
                workflow.push(WorkflowStep::Sort {
                    by: vec![by],
                    sort,
                });
            }
        }
        let mut payload = DataQueryPayload::new(workflow);
        payload.limit = options.values_limit;
        payload.offset = options.values_offset;
        payload
    };

    // Distinct cardinality: group, then count the groups while summing
    // the per-group counts back into the row total.
    let values_meta_payload = {
        let mut workflow = Vec::new();
        workflow.extend(transform_work.iter().cloned());
        workflow.extend(filter_work.iter().cloned());
        workflow.push(WorkflowStep::View {
            query: vec![grouped_counts.clone()],
        });
        workflow.push(WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: Vec::new(),
                measures: vec![
                    MeasureSpec::count_star(&total_distinct_id),
                    MeasureSpec::new(count_id.clone(), Aggregator::Sum).with_key("count"),
                ],
            }],
        });
        DataQueryPayload::new(workflow)
    };

    let range_payload = {
        let mut workflow = Vec::new();
        workflow.extend(transform_work.iter().cloned());
        workflow.extend(filter_work.iter().cloned());
        workflow.push(WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: Vec::new(),
                measures: vec![
                    MeasureSpec::new(fid.clone(), Aggregator::Min).with_key(&min_id),
                    MeasureSpec::new(fid.clone(), Aggregator::Max).with_key(&max_id),
                ],
            }],
        });
        DataQueryPayload::new(workflow)
    };

    let selected_payload = (!options.selected.is_empty()).then(|| {
        let mut workflow = Vec::new();
        workflow.extend(transform_work.iter().cloned());
        workflow.extend(filter_work.iter().cloned());
        workflow.push(WorkflowStep::Filter {
            filters: vec![VisFilter {
                fid: fid.clone(),
                rule: FilterRule::OneOf {
                    value: options.selected.clone(),
                },
            }],
        });
        workflow.push(WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: Vec::new(),
                measures: vec![MeasureSpec::count_star("count")],
            }],
        });
        DataQueryPayload::new(workflow)
    });

    let values_fut = async {
        if options.values {
            data_query(backend, &values_payload).await
        } else {
            Ok(Vec::new())
        }
    };
    let meta_fut = async {
        if options.values_meta {
            data_query(backend, &values_meta_payload).await
        } else {
            Ok(Vec::new())
        }
    };
    let range_fut = async {
        if options.range {
            data_query(backend, &range_payload).await
        } else {
            Ok(Vec::new())
        }
    };
    let selected_fut = async {
        match &selected_payload {
            Some(payload) => data_query(backend, payload).await,
            None => Ok(Vec::new()),
        }
    };

    let (values_rows, meta_rows, range_rows, selected_rows) =
        try_join!(values_fut, meta_fut, range_fut, selected_fut)?;

    let values = values_rows
        .iter()
        .map(|row| ValueCount {
            value: row.get(fid.as_str()).cloned().unwrap_or(Value::Null),
            count: count_of(Some(row), &count_id),
        })
        .collect();
    let values_meta = ValuesMeta {
        total: count_of(meta_rows.first(), "count"),
        distinct_total: count_of(meta_rows.first(), &total_distinct_id),
    };
    let range = match range_rows.first() {
        Some(row) => (
            row.get(&min_id).cloned().unwrap_or(Value::from(0)),
            row.get(&max_id).cloned().unwrap_or(Value::from(0)),
        ),
        None => (Value::from(0), Value::from(0)),
    };

    Ok(FieldStats {
        values,
        values_meta,
        range,
        selected_count: count_of(selected_rows.first(), "count"),
    })
}

/// Numeric min/max of a field.
pub async fn get_range(
    backend: &dyn ComputationBackend,
    fid: &str,
) -> StatsResult<(f64, f64)> {
    let min_id = format!("min_{}", fid);
    let max_id = format!("max_{}", fid);
    let payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: Vec::new(),
            measures: vec![
                MeasureSpec::new(fid, Aggregator::Min).with_key(&min_id),
                MeasureSpec::new(fid, Aggregator::Max).with_key(&max_id),
            ],
        }],
    }]);
    let rows = data_query(backend, &payload).await?;
    let get = |key: &str| {
        rows.first()
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };
    Ok((get(&min_id), get(&max_id)))
}

/// One sample value of a field, used to sniff formats.
pub async fn get_sample(
    backend: &dyn ComputationBackend,
    fid: &str,
) -> StatsResult<Option<Value>> {
    let payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Raw {
            fields: vec![fid.to_string()],
        }],
    }])
    .with_limit(1)
    .with_offset(0);
    let rows = data_query(backend, &payload).await?;
    Ok(rows.first().and_then(|r| r.get(fid)).cloned())
}

/// Temporal min/max of a field in epoch milliseconds, plus the sniffed
/// time format. The offset defaults to 0 (UTC).
pub async fn get_temporal_range(
    backend: &dyn ComputationBackend,
    fid: &str,
    offset: Option<i32>,
) -> StatsResult<(i64, i64, TimeFormat)> {
    let sample = get_sample(backend, fid).await?;
    let format = sniff_time_format(sample.as_ref().unwrap_or(&Value::Null));
    let used_offset = offset.unwrap_or(0);

    let min_id = format!("min_{}", fid);
    let max_id = format!("max_{}", fid);
    let payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: Vec::new(),
            measures: vec![
                MeasureSpec::new(fid, Aggregator::Min)
                    .with_key(&min_id)
                    .with_format(format.as_str(), Some(used_offset)),
                MeasureSpec::new(fid, Aggregator::Max)
                    .with_key(&max_id)
                    .with_format(format.as_str(), Some(used_offset)),
            ],
        }],
    }]);
    let rows = data_query(backend, &payload).await?;
    let get = |key: &str| {
        rows.first()
            .and_then(|r| r.get(key))
            .and_then(parse_timestamp)
            .unwrap_or(0)
    };
    Ok((get(&min_id), get(&max_id), format))
}

/// Options for [`get_distinct_values`].
#[derive(Debug, Clone, Default)]
pub struct DistinctValuesOptions {
    pub sort_by: ValueSortOrder,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Distinct values of a field with per-value row counts.
pub async fn get_distinct_values(
    backend: &dyn ComputationBackend,
    fid: &str,
    options: &DistinctValuesOptions,
) -> StatsResult<Vec<ValueCount>> {
    let count_id = format!("count_{}", fid);
    let mut workflow = vec![WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: vec![fid.to_string()],
            measures: vec![MeasureSpec::count_star(&count_id)],
        }],
    }];
    match options.sort_by {
        ValueSortOrder::None => {}
        ValueSortOrder::ValueAsc => workflow.push(WorkflowStep::Sort {
            by: vec![fid.to_string()],
            sort: SortOrder::Ascending,
        }),
        ValueSortOrder::ValueDesc => workflow.push(WorkflowStep::Sort {
            by: vec![fid.to_string()],
            sort: SortOrder::Descending,
        }),
        ValueSortOrder::CountAsc => workflow.push(WorkflowStep::Sort {
            by: vec![count_id.clone()],
            sort: SortOrder::Ascending,
        }),
        ValueSortOrder::CountDesc => workflow.push(WorkflowStep::Sort {
            by: vec![count_id.clone()],
            sort: SortOrder::Descending,
        }),
    }
    let mut payload = DataQueryPayload::new(workflow);
    payload.limit = options.limit;
    payload.offset = options.offset;

    let rows = data_query(backend, &payload).await?;
    Ok(rows
        .iter()
        .map(|row| ValueCount {
            value: row.get(fid).cloned().unwrap_or(Value::Null),
            count: count_of(Some(row), &count_id),
        })
        .collect())
}

/// Distinct-cardinality metadata of a field.
pub async fn get_distinct_meta(
    backend: &dyn ComputationBackend,
    fid: &str,
) -> StatsResult<ValuesMeta> {
    let count_id = format!("count_{}", fid);
    let total_distinct_id = format!("total_distinct_{}", fid);
    let payload = DataQueryPayload::new(vec![
        WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: vec![fid.to_string()],
                measures: vec![MeasureSpec::count_star(&count_id)],
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: Vec::new(),
                measures: vec![
                    MeasureSpec::count_star(&total_distinct_id),
                    MeasureSpec::new(count_id.clone(), Aggregator::Sum).with_key("count"),
                ],
            }],
        },
    ]);
    let rows = data_query(backend, &payload).await?;
    Ok(ValuesMeta {
        total: count_of(rows.first(), "count"),
        distinct_total: count_of(rows.first(), &total_distinct_id),
    })
}

/// Profile of a nominal field: cardinality plus its two most frequent
/// values.
pub async fn profile_nominal_field(
    backend: &dyn ComputationBackend,
    fid: &str,
) -> StatsResult<(ValuesMeta, Vec<ValueCount>)> {
    const TOPS: usize = 2;
    let meta = get_distinct_meta(backend, fid);
    let tops = get_distinct_values(
        backend,
        fid,
        &DistinctValuesOptions {
            sort_by: ValueSortOrder::CountDesc,
            limit: Some(TOPS),
            offset: None,
        },
    );
    let (meta, tops) = try_join!(meta, tops)?;
    Ok((meta, tops))
}

/// One bucket of a quantitative profile histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct BinBucket {
    pub from: f64,
    pub to: f64,
    pub count: u64,
}

/// Profile of a quantitative field: domain plus a fixed 10-bucket
/// histogram computed through a bin transform.
pub async fn profile_quantitative_field(
    backend: &dyn ComputationBackend,
    fid: &str,
) -> StatsResult<(f64, f64, Vec<BinBucket>)> {
    const BIN_SIZE: usize = 10;
    let bin_field = format!("bin_{}", fid);
    let count_field = format!("count_{}", fid);

    let histogram_payload = DataQueryPayload::new(vec![
        WorkflowStep::Transform {
            transform: vec![FieldTransform {
                key: bin_field.clone(),
                expression: Expression::Bin {
                    field: fid.to_string(),
                    bin_count: BIN_SIZE,
                },
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: vec![bin_field.clone()],
                measures: vec![MeasureSpec::count_star(&count_field)],
            }],
        },
    ]);

    let range = get_range(backend, fid);
    let histogram = async { Ok(data_query(backend, &histogram_payload).await?) };
    let ((min, max), rows): ((f64, f64), Vec<Row>) = try_join!(range, histogram)?;

    let step = (max - min) / BIN_SIZE as f64;
    let mut counts = vec![0_u64; BIN_SIZE];
    for row in &rows {
        let index = row
            .get(&bin_field)
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::MAX) as usize;
        if index < BIN_SIZE {
            counts[index] = count_of(Some(row), &count_field);
        }
    }
    let buckets = counts
        .iter()
        .enumerate()
        .map(|(i, count)| BinBucket {
            from: min + step * i as f64,
            to: min + step * (i + 1) as f64,
            count: *count,
        })
        .collect();
    Ok((min, max, buckets))
}

/// Paged raw read.
///
/// Applies the same filter step the caller's count query uses, so the sum
/// of returned page sizes equals the filtered count.
pub async fn data_read_raw(
    backend: &dyn ComputationBackend,
    page_size: usize,
    page_offset: usize,
    options: &ReadRawOptions,
) -> StatsResult<Vec<Row>> {
    let mut workflow = Vec::new();
    if !options.filters.is_empty() {
        workflow.push(WorkflowStep::Filter {
            filters: options.filters.clone(),
        });
    }
    workflow.push(WorkflowStep::View {
        query: vec![ViewQuery::Raw {
            fields: vec!["*".to_string()],
        }],
    });
    if let Some(sorting) = &options.sorting {
        workflow.push(WorkflowStep::Sort {
            by: vec![sorting.fid.clone()],
            sort: sorting.sort,
        });
    }
    let payload = DataQueryPayload::new(workflow)
        .with_limit(page_size)
        .with_offset(page_offset * page_size);
    Ok(data_query(backend, &payload).await?)
}

/// Filtered row count, the counterpart of [`data_read_raw`] pagination.
pub async fn data_read_count(
    backend: &dyn ComputationBackend,
    filters: &[VisFilter],
) -> StatsResult<u64> {
    let mut workflow = Vec::new();
    if !filters.is_empty() {
        workflow.push(WorkflowStep::Filter {
            filters: filters.to_vec(),
        });
    }
    workflow.push(WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: Vec::new(),
            measures: vec![MeasureSpec::count_star("count")],
        }],
    });
    let rows = data_query(backend, &DataQueryPayload::new(workflow)).await?;
    Ok(count_of(rows.first(), "count"))
}
