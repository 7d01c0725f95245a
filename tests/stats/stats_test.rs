//! Tests for the statistics and pagination layer.

use std::sync::Arc;

use serde_json::json;

use vizflow::computation::LocalBackend;
use vizflow::model::{Field, FilterRule, Row, VisFilter};
use vizflow::stats::{
    data_read_count, data_read_raw, dataset_stats, field_stat, get_distinct_values, get_range,
    get_sample, get_temporal_range, profile_nominal_field, profile_quantitative_field,
    DistinctValuesOptions, FieldStatOptions, GenerationTracker, Keyword, RawSorting,
    ReadRawOptions, ValueSortOrder,
};
use vizflow::workflow::SortOrder;
use vizflow::model::TimeFormat;

fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
    values
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
}

fn people() -> Vec<Row> {
    rows(vec![
        json!({"city": "NYC", "age": 30, "joined": "2024-03-07"}),
        json!({"city": "LA", "age": 22, "joined": "2023-06-01"}),
        json!({"city": "NYC", "age": 50, "joined": "2024-01-15"}),
        json!({"city": "SF", "age": 28, "joined": "2022-12-31"}),
        json!({"city": "NYC", "age": 35, "joined": "2023-02-02"}),
    ])
}

#[tokio::test]
async fn test_dataset_stats_row_count() {
    let backend = LocalBackend::new(people());
    let stats = dataset_stats(&backend).await.unwrap();
    assert_eq!(stats.row_count, 5);
}

#[tokio::test]
async fn test_field_stat_full() {
    let backend = LocalBackend::new(people());
    let field = Field::dimension("city", "City");
    let options = FieldStatOptions {
        sort_by: ValueSortOrder::CountDesc,
        ..FieldStatOptions::all()
    };
    let stats = field_stat(&backend, &field, &options, &[field.clone()])
        .await
        .unwrap();

    assert_eq!(stats.values_meta.total, 5);
    assert_eq!(stats.values_meta.distinct_total, 3);
    // Grouped counts sorted descending by count.
    assert_eq!(stats.values[0].value, json!("NYC"));
    assert_eq!(stats.values[0].count, 3);
    let counts: Vec<u64> = stats.values.iter().map(|v| v.count).collect();
    assert!(counts.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_field_stat_halves_are_skippable() {
    let backend = LocalBackend::new(people());
    let field = Field::measure("age", "Age");
    let options = FieldStatOptions {
        values: false,
        values_meta: false,
        range: true,
        ..FieldStatOptions::default()
    };
    let stats = field_stat(&backend, &field, &options, &[field.clone()])
        .await
        .unwrap();
    assert!(stats.values.is_empty());
    assert_eq!(stats.values_meta.total, 0);
    assert_eq!(stats.range, (json!(22.0), json!(50.0)));
}

#[tokio::test]
async fn test_field_stat_keyword_prefilter() {
    let backend = LocalBackend::new(people());
    let field = Field::dimension("city", "City");
    let options = FieldStatOptions {
        keyword: Some(Keyword {
            pattern: "^n".to_string(),
            case_sensitive: false,
            word: false,
        }),
        ..FieldStatOptions::all()
    };
    let stats = field_stat(&backend, &field, &options, &[field.clone()])
        .await
        .unwrap();
    assert_eq!(stats.values.len(), 1);
    assert_eq!(stats.values[0].value, json!("NYC"));
    assert_eq!(stats.values_meta.total, 3);
}

#[tokio::test]
async fn test_field_stat_selected_count() {
    let backend = LocalBackend::new(people());
    let field = Field::dimension("city", "City");
    let options = FieldStatOptions {
        selected: vec![json!("NYC"), json!("SF")],
        ..FieldStatOptions::all()
    };
    let stats = field_stat(&backend, &field, &options, &[field.clone()])
        .await
        .unwrap();
    assert_eq!(stats.selected_count, 4);
}

#[tokio::test]
async fn test_get_range() {
    let backend = LocalBackend::new(people());
    assert_eq!(get_range(&backend, "age").await.unwrap(), (22.0, 50.0));
}

#[tokio::test]
async fn test_get_sample_and_temporal_range() {
    let backend = LocalBackend::new(people());
    let sample = get_sample(&backend, "joined").await.unwrap();
    assert_eq!(sample, Some(json!("2024-03-07")));

    let (min, max, format) = get_temporal_range(&backend, "joined", None).await.unwrap();
    assert_eq!(format, TimeFormat::Date);
    // 2022-12-31 .. 2024-03-07, as epoch milliseconds.
    assert_eq!(min, 1_672_444_800_000);
    assert_eq!(max, 1_709_769_600_000);
}

#[tokio::test]
async fn test_get_distinct_values_paged() {
    let backend = LocalBackend::new(people());
    let options = DistinctValuesOptions {
        sort_by: ValueSortOrder::CountDesc,
        limit: Some(2),
        offset: None,
    };
    let values = get_distinct_values(&backend, "city", &options).await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].value, json!("NYC"));
    assert_eq!(values[0].count, 3);
}

#[tokio::test]
async fn test_profile_nominal_field() {
    let backend = LocalBackend::new(people());
    let (meta, tops) = profile_nominal_field(&backend, "city").await.unwrap();
    assert_eq!(meta.total, 5);
    assert_eq!(meta.distinct_total, 3);
    assert_eq!(tops.len(), 2);
    assert_eq!(tops[0].value, json!("NYC"));
}

#[tokio::test]
async fn test_profile_quantitative_field() {
    let values: Vec<serde_json::Value> = (0..100).map(|i| json!({"x": i})).collect();
    let backend = LocalBackend::new(rows(values));
    let (min, max, buckets) = profile_quantitative_field(&backend, "x").await.unwrap();
    assert_eq!(min, 0.0);
    assert_eq!(max, 99.0);
    assert_eq!(buckets.len(), 10);
    let total: u64 = buckets.iter().map(|b| b.count).sum();
    assert_eq!(total, 100);
    assert_eq!(buckets[0].from, 0.0);
    assert_eq!(buckets[9].to, 99.0);
}

#[tokio::test]
async fn test_data_read_raw_pagination_consistent_with_count() {
    let backend = LocalBackend::new(people());
    let filters = vec![VisFilter {
        fid: "city".to_string(),
        rule: FilterRule::OneOf {
            value: vec![json!("NYC"), json!("LA")],
        },
    }];

    let total = data_read_count(&backend, &filters).await.unwrap();
    assert_eq!(total, 4);

    let page_size = 3_usize;
    let pages = (total as usize).div_ceil(page_size);
    let mut seen = 0_usize;
    for page in 0..pages {
        let rows = data_read_raw(
            &backend,
            page_size,
            page,
            &ReadRawOptions {
                sorting: None,
                filters: filters.clone(),
            },
        )
        .await
        .unwrap();
        seen += rows.len();
    }
    assert_eq!(seen as u64, total);
}

#[tokio::test]
async fn test_data_read_raw_sorting() {
    let backend = LocalBackend::new(people());
    let rows = data_read_raw(
        &backend,
        5,
        0,
        &ReadRawOptions {
            sorting: Some(RawSorting {
                fid: "age".to_string(),
                sort: SortOrder::Ascending,
            }),
            filters: Vec::new(),
        },
    )
    .await
    .unwrap();
    let ages: Vec<i64> = rows
        .iter()
        .map(|r| r.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![22, 28, 30, 35, 50]);
}

#[tokio::test]
async fn test_stale_response_is_dropped() {
    // R1 issued, then R2 issued before R1 resolves; R1 resolves last and
    // must not be applied.
    let tracker = Arc::new(GenerationTracker::new());

    let r1 = tracker.issue();
    let r2 = tracker.issue();

    let slow = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            tracker.apply(r1, "r1 rows")
        })
    };
    let fast = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.apply(r2, "r2 rows") })
    };

    let applied_fast = fast.await.unwrap();
    let applied_slow = slow.await.unwrap();
    assert_eq!(applied_fast, Some("r2 rows"));
    assert_eq!(applied_slow, None);
}
