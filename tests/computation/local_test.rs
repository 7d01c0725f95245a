//! End-to-end tests of the local backend against compiled workflows.

use std::collections::HashMap;

use serde_json::json;

use vizflow::computation::{data_query, ComputationBackend, LocalBackend};
use vizflow::model::{
    Aggregator, AnalyticType, Expression, Field, FilterField, FilterRule, Row, SemanticType,
};
use vizflow::workflow::{
    to_workflow, DataQueryPayload, FieldTransform, SortOrder, ViewQuery, ViewSnapshot,
    WorkflowStep,
};

fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
    values
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
}

fn people() -> Vec<Row> {
    rows(vec![
        json!({"city": "NYC", "age": 30}),
        json!({"city": "LA", "age": 22}),
        json!({"city": "NYC", "age": 50}),
        json!({"city": "SF", "age": 28}),
        json!({"city": "LA", "age": 35}),
    ])
}

fn age() -> Field {
    Field::measure("age", "Age").with_agg(Aggregator::Mean)
}

fn city() -> Field {
    Field::dimension("city", "City")
}

#[tokio::test]
async fn test_filtered_mean_single_group() {
    // Filter to NYC, aggregate mean(age) with an empty group-by: exactly
    // one output row carrying the NYC mean.
    let snap = ViewSnapshot {
        all_fields: vec![age(), city()],
        view_dimensions: vec![],
        view_measures: vec![age()],
        filters: vec![FilterField::new(
            city(),
            FilterRule::OneOf {
                value: vec![json!("NYC")],
            },
        )],
        default_aggregated: true,
        ..ViewSnapshot::default()
    };
    let payload = to_workflow(&snap).unwrap().into_payload(None);

    let backend = LocalBackend::new(people());
    let result = data_query(&backend, &payload).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("age_mean"), Some(&json!(40.0)));
}

#[tokio::test]
async fn test_count_matches_raw_length() {
    let backend = LocalBackend::new(people());

    let count_payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Aggregate {
            group_by: vec![],
            measures: vec![vizflow::model::MeasureSpec::count_star("count")],
        }],
    }]);
    let count_rows = backend.query(&count_payload).await.unwrap();
    let count = count_rows[0].get("count").unwrap().as_u64().unwrap();

    let raw_payload = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Raw {
            fields: vec!["*".to_string()],
        }],
    }]);
    let raw_rows = backend.query(&raw_payload).await.unwrap();

    assert_eq!(count as usize, raw_rows.len());
}

#[tokio::test]
async fn test_pagination_covers_every_row_exactly_once() {
    let backend = LocalBackend::new(people());
    let total = 5_usize;
    let page_size = 2_usize;
    let pages = total.div_ceil(page_size);

    let mut seen = 0_usize;
    for page in 0..pages {
        let payload = DataQueryPayload::new(vec![WorkflowStep::View {
            query: vec![ViewQuery::Raw {
                fields: vec!["*".to_string()],
            }],
        }])
        .with_limit(page_size)
        .with_offset(page * page_size);
        let rows = backend.query(&payload).await.unwrap();
        seen += rows.len();
    }
    assert_eq!(seen, total);
}

#[tokio::test]
async fn test_inner_join_projection() {
    // A.user_id -> B.id, raw projection of left.name / right.score:
    // one row per matching pair, nothing for unmatched keys.
    let mut datasets = HashMap::new();
    datasets.insert(
        "A".to_string(),
        rows(vec![
            json!({"user_id": 1, "name": "ada"}),
            json!({"user_id": 2, "name": "bob"}),
            json!({"user_id": 7, "name": "nobody"}),
        ]),
    );
    datasets.insert(
        "B".to_string(),
        rows(vec![
            json!({"id": 1, "score": 10}),
            json!({"id": 2, "score": 20}),
            json!({"id": 2, "score": 25}),
        ]),
    );
    let backend = LocalBackend::from_datasets(datasets, "A");

    let payload = DataQueryPayload::new(vec![
        WorkflowStep::Join {
            foreigns: vec![vizflow::workflow::JoinSpec {
                join_type: vizflow::workflow::JoinType::Inner,
                keys: vec![
                    vizflow::workflow::JoinKey {
                        dataset: "A".to_string(),
                        field: "user_id".to_string(),
                        alias: "left".to_string(),
                    },
                    vizflow::workflow::JoinKey {
                        dataset: "B".to_string(),
                        field: "id".to_string(),
                        alias: "right".to_string(),
                    },
                ],
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Raw {
                fields: vec!["left.name".to_string(), "right.score".to_string()],
            }],
        },
    ]);

    let result = backend.query(&payload).await.unwrap();
    assert_eq!(result.len(), 3);
    assert!(result
        .iter()
        .all(|r| r.contains_key("left.name") && r.contains_key("right.score")));
    assert!(!result
        .iter()
        .any(|r| r.get("left.name") == Some(&json!("nobody"))));
}

#[tokio::test]
async fn test_compiled_multi_dataset_workflow_end_to_end() {
    let order_amount = Field::measure("amount", "Amount")
        .with_dataset("orders")
        .with_agg(Aggregator::Sum);
    let order_user = Field::new(
        "user_id",
        "User id",
        AnalyticType::Dimension,
        SemanticType::Nominal,
    )
    .with_dataset("orders")
    .with_foreign("users", "id");
    let user_name = Field::dimension("name", "Name").with_dataset("users");

    let snap = ViewSnapshot {
        all_fields: vec![order_amount.clone(), order_user, user_name.clone()],
        view_dimensions: vec![user_name],
        view_measures: vec![order_amount],
        default_aggregated: true,
        ..ViewSnapshot::default()
    };
    let compiled = to_workflow(&snap).unwrap();
    let payload = compiled.into_payload(None);

    let mut datasets = HashMap::new();
    datasets.insert(
        "orders".to_string(),
        rows(vec![
            json!({"user_id": 1, "amount": 100}),
            json!({"user_id": 1, "amount": 50}),
            json!({"user_id": 2, "amount": 10}),
        ]),
    );
    datasets.insert(
        "users".to_string(),
        rows(vec![
            json!({"id": 1, "name": "ada"}),
            json!({"id": 2, "name": "bob"}),
        ]),
    );
    let backend = LocalBackend::from_datasets(datasets, "orders");

    let mut result = backend.query(&payload).await.unwrap();
    assert_eq!(result.len(), 2);
    result.sort_by_key(|r| {
        r.values()
            .find_map(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    });
    let sums: Vec<f64> = result
        .iter()
        .map(|r| {
            r.iter()
                .find(|(k, _)| k.ends_with("_sum"))
                .and_then(|(_, v)| v.as_f64())
                .unwrap()
        })
        .collect();
    assert_eq!(sums, vec![150.0, 10.0]);
}

#[tokio::test]
async fn test_bin_invariant_through_backend() {
    let values: Vec<serde_json::Value> = (0..=100).map(|i| json!({"x": i})).collect();
    let backend = LocalBackend::new(rows(values));

    let payload = DataQueryPayload::new(vec![
        WorkflowStep::Transform {
            transform: vec![FieldTransform {
                key: "bin_x".to_string(),
                expression: Expression::Bin {
                    field: "x".to_string(),
                    bin_count: 10,
                },
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Raw {
                fields: vec!["x".to_string(), "bin_x".to_string()],
            }],
        },
    ]);
    let result = backend.query(&payload).await.unwrap();
    for row in &result {
        let bucket = row.get("bin_x").unwrap().as_u64().unwrap();
        assert!(bucket <= 9);
        if row.get("x") == Some(&json!(100)) {
            assert_eq!(bucket, 9);
        }
    }
}

#[tokio::test]
async fn test_sorted_limited_view() {
    let snap = ViewSnapshot {
        all_fields: vec![age(), city()],
        view_dimensions: vec![city()],
        view_measures: vec![age()],
        default_aggregated: true,
        sort: SortOrder::Descending,
        limit: Some(2),
        ..ViewSnapshot::default()
    };
    let payload = to_workflow(&snap).unwrap().into_payload(Some(2));

    let backend = LocalBackend::new(people());
    let result = data_query(&backend, &payload).await.unwrap();
    assert_eq!(result.len(), 2);
    // NYC mean 40 first, then LA mean 28.5.
    assert_eq!(result[0].get("city"), Some(&json!("NYC")));
    assert_eq!(result[1].get("city"), Some(&json!("LA")));
}

#[tokio::test]
async fn test_temporal_drill_groups_by_month() {
    let backend = LocalBackend::new(rows(vec![
        json!({"ts": "2024-03-07", "v": 1}),
        json!({"ts": "2024-03-20", "v": 2}),
        json!({"ts": "2024-11-01", "v": 3}),
    ]));
    let payload = DataQueryPayload::new(vec![
        WorkflowStep::Transform {
            transform: vec![FieldTransform {
                key: "month".to_string(),
                expression: Expression::DateTimeDrill {
                    field: "ts".to_string(),
                    level: vizflow::model::DateTimeLevel::Month,
                    offset: Some(0),
                },
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: vec!["month".to_string()],
                measures: vec![vizflow::model::MeasureSpec::new("v", Aggregator::Sum)],
            }],
        },
    ]);
    let result = backend.query(&payload).await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].get("month"), Some(&json!("2024-03")));
    assert_eq!(result[0].get("v_sum"), Some(&json!(3.0)));
    assert_eq!(result[1].get("month"), Some(&json!("2024-11")));
}

#[tokio::test]
async fn test_sql_expression_through_backend() {
    let backend = LocalBackend::new(rows(vec![
        json!({"price": 10, "qty": 3}),
        json!({"price": 5, "qty": 2}),
    ]));
    let payload = DataQueryPayload::new(vec![
        WorkflowStep::Transform {
            transform: vec![FieldTransform {
                key: "total".to_string(),
                expression: Expression::Sql {
                    sql: "price * qty".to_string(),
                },
            }],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Raw {
                fields: vec!["total".to_string()],
            }],
        },
    ]);
    let result = backend.query(&payload).await.unwrap();
    assert_eq!(result[0].get("total"), Some(&json!(30.0)));
    assert_eq!(result[1].get("total"), Some(&json!(10.0)));
}

#[tokio::test]
async fn test_malformed_sql_rejects_with_message() {
    let backend = LocalBackend::new(people());
    let payload = DataQueryPayload::new(vec![WorkflowStep::Transform {
        transform: vec![FieldTransform {
            key: "broken".to_string(),
            expression: Expression::Sql {
                sql: "upper('unclosed".to_string(),
            },
        }],
    }]);
    let err = backend.query(&payload).await.unwrap_err();
    assert!(!err.to_string().is_empty());
}
