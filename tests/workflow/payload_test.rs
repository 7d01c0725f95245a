//! Tests for payload builders and the wire format.

use serde_json::json;

use vizflow::model::{Aggregator, Expression, FilterRule, MeasureSpec, VisFilter};
use vizflow::workflow::{
    add_filter_for_query, add_join_for_query, add_transform_for_query, change_dataset_for_query,
    DataQueryPayload, FieldTransform, JoinKey, JoinSpec, JoinType, ViewQuery, WorkflowStep,
};

fn filter(fid: &str, value: &str) -> VisFilter {
    VisFilter {
        fid: fid.to_string(),
        rule: FilterRule::OneOf {
            value: vec![json!(value)],
        },
    }
}

fn view_payload() -> DataQueryPayload {
    DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Raw {
            fields: vec!["*".to_string()],
        }],
    }])
}

fn filters_of(payload: &DataQueryPayload) -> Vec<&VisFilter> {
    payload
        .workflow
        .iter()
        .flat_map(|s| match s {
            WorkflowStep::Filter { filters } => filters.iter().collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .collect()
}

#[test]
fn test_add_filter_prepends_step() {
    let payload = add_filter_for_query(&view_payload(), &[filter("city", "NYC")]);
    assert!(matches!(payload.workflow[0], WorkflowStep::Filter { .. }));
    assert_eq!(payload.workflow.len(), 2);
}

#[test]
fn test_add_filter_extends_existing_step() {
    let once = add_filter_for_query(&view_payload(), &[filter("city", "NYC")]);
    let twice = add_filter_for_query(&once, &[filter("country", "US")]);

    // Still one filter step, now holding both rules.
    let steps: Vec<_> = twice
        .workflow
        .iter()
        .filter(|s| matches!(s, WorkflowStep::Filter { .. }))
        .collect();
    assert_eq!(steps.len(), 1);
    assert_eq!(filters_of(&twice).len(), 2);
}

#[test]
fn test_add_filter_union_has_no_duplicate_fids() {
    let f1 = vec![filter("city", "NYC"), filter("country", "US")];
    let f2 = vec![filter("city", "LA")];

    let chained = add_filter_for_query(&add_filter_for_query(&view_payload(), &f1), &f2);
    let mut union = f2.clone();
    union.extend(f1.iter().filter(|f| f.fid != "city").cloned());
    let single = add_filter_for_query(&view_payload(), &union);

    assert_eq!(chained, single);
    let fids: Vec<&str> = filters_of(&chained).iter().map(|f| f.fid.as_str()).collect();
    assert_eq!(fids.iter().filter(|f| **f == "city").count(), 1);
    // The newer rule won.
    assert!(filters_of(&chained)
        .iter()
        .any(|f| f.rule == FilterRule::OneOf { value: vec![json!("LA")] }));
}

#[test]
fn test_add_filter_empty_is_identity() {
    let payload = view_payload();
    assert_eq!(add_filter_for_query(&payload, &[]), payload);
}

fn join_spec() -> JoinSpec {
    JoinSpec {
        join_type: JoinType::Inner,
        keys: vec![
            JoinKey {
                dataset: "orders".to_string(),
                field: "user_id".to_string(),
                alias: "left".to_string(),
            },
            JoinKey {
                dataset: "users".to_string(),
                field: "id".to_string(),
                alias: "right".to_string(),
            },
        ],
    }
}

#[test]
fn test_add_join_sits_between_filter_and_view() {
    let payload = add_filter_for_query(&view_payload(), &[filter("city", "NYC")]);
    let payload = add_join_for_query(&payload, &[join_spec()]);
    assert!(matches!(payload.workflow[0], WorkflowStep::Filter { .. }));
    assert!(matches!(payload.workflow[1], WorkflowStep::Join { .. }));
    assert!(matches!(payload.workflow[2], WorkflowStep::View { .. }));
}

#[test]
fn test_add_join_does_not_duplicate_specs() {
    let payload = add_join_for_query(&view_payload(), &[join_spec()]);
    let payload = add_join_for_query(&payload, &[join_spec()]);
    let join_steps: Vec<_> = payload
        .workflow
        .iter()
        .filter_map(|s| match s {
            WorkflowStep::Join { foreigns } => Some(foreigns.len()),
            _ => None,
        })
        .collect();
    assert_eq!(join_steps, vec![1]);
}

#[test]
fn test_add_transform_orders_dependencies() {
    let transforms = vec![
        FieldTransform {
            key: "b".to_string(),
            expression: Expression::Sql {
                sql: "a + 1".to_string(),
            },
        },
        FieldTransform {
            key: "a".to_string(),
            expression: Expression::Log {
                field: "x".to_string(),
                base: 10.0,
            },
        },
    ];
    let payload = add_transform_for_query(&view_payload(), &transforms).unwrap();
    // Transform lands before the view.
    assert!(matches!(payload.workflow[0], WorkflowStep::Transform { .. }));
    let WorkflowStep::Transform { transform } = &payload.workflow[0] else {
        unreachable!();
    };
    let keys: Vec<&str> = transform.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_change_dataset_retargets_payload() {
    let payload = change_dataset_for_query(&view_payload(), vec!["preview".to_string()]);
    assert_eq!(payload.datasets, Some(vec!["preview".to_string()]));
}

#[test]
fn test_empty_raw_view_is_the_empty_sentinel() {
    let empty = DataQueryPayload::new(vec![WorkflowStep::View {
        query: vec![ViewQuery::Raw { fields: vec![] }],
    }]);
    assert!(empty.is_empty_view());
    assert!(!view_payload().is_empty_view());
}

#[test]
fn test_payload_wire_format() {
    let payload = DataQueryPayload::new(vec![
        WorkflowStep::Filter {
            filters: vec![filter("city", "NYC")],
        },
        WorkflowStep::View {
            query: vec![ViewQuery::Aggregate {
                group_by: vec!["city".to_string()],
                measures: vec![MeasureSpec::new("age", Aggregator::Mean)],
            }],
        },
    ])
    .with_limit(500);

    insta::assert_snapshot!(
        serde_json::to_string(&payload).unwrap(),
        @r#"{"workflow":[{"type":"filter","filters":[{"fid":"city","rule":{"type":"one of","value":["NYC"]}}]},{"type":"view","query":[{"op":"aggregate","groupBy":["city"],"measures":[{"field":"age","agg":"mean","asFieldKey":"age_mean"}]}]}],"limit":500}"#
    );

    // The wire format round-trips.
    let parsed: DataQueryPayload =
        serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
    assert_eq!(parsed, payload);
}
