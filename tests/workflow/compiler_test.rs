//! Tests for the top-level workflow builder.

use serde_json::json;

use vizflow::model::{
    Aggregator, AnalyticType, Expression, Field, FilterField, FilterRule, SemanticType,
};
use vizflow::workflow::{
    to_workflow, CompileError, SortOrder, ViewQuery, ViewSnapshot, WorkflowStep,
};

fn age() -> Field {
    Field::measure("age", "Age").with_agg(Aggregator::Mean)
}

fn city() -> Field {
    Field::dimension("city", "City")
}

fn snapshot() -> ViewSnapshot {
    ViewSnapshot {
        all_fields: vec![age(), city()],
        view_dimensions: vec![city()],
        view_measures: vec![age()],
        default_aggregated: true,
        ..ViewSnapshot::default()
    }
}

fn view_step(steps: &[WorkflowStep]) -> &ViewQuery {
    steps
        .iter()
        .find_map(|s| match s {
            WorkflowStep::View { query } => query.first(),
            _ => None,
        })
        .expect("workflow has a view step")
}

#[test]
fn test_aggregated_view() {
    let compiled = to_workflow(&snapshot()).unwrap();
    assert_eq!(compiled.steps.len(), 1);
    match view_step(&compiled.steps) {
        ViewQuery::Aggregate { group_by, measures } => {
            assert_eq!(group_by, &vec!["city".to_string()]);
            assert_eq!(measures.len(), 1);
            assert_eq!(measures[0].field, "age");
            assert_eq!(measures[0].agg, Aggregator::Mean);
            assert_eq!(measures[0].as_field_key, "age_mean");
        }
        other => panic!("expected aggregate view, got {:?}", other),
    }
}

#[test]
fn test_raw_view_when_not_aggregated() {
    let mut snap = snapshot();
    snap.default_aggregated = false;
    let compiled = to_workflow(&snap).unwrap();
    match view_step(&compiled.steps) {
        ViewQuery::Raw { fields } => {
            assert_eq!(fields, &vec!["city".to_string(), "age".to_string()]);
        }
        other => panic!("expected raw view, got {:?}", other),
    }
}

#[test]
fn test_filter_step_precedes_view() {
    let mut snap = snapshot();
    snap.filters = vec![FilterField::new(
        city(),
        FilterRule::OneOf {
            value: vec![json!("NYC")],
        },
    )];
    let compiled = to_workflow(&snap).unwrap();
    assert!(matches!(compiled.steps[0], WorkflowStep::Filter { .. }));
    assert!(matches!(
        compiled.steps.last().unwrap(),
        WorkflowStep::View { .. }
    ));
}

#[test]
fn test_unconfigured_filter_is_not_compiled() {
    let mut snap = snapshot();
    snap.filters = vec![FilterField {
        field: city(),
        rule: None,
    }];
    let compiled = to_workflow(&snap).unwrap();
    assert!(!compiled
        .steps
        .iter()
        .any(|s| matches!(s, WorkflowStep::Filter { .. })));
}

#[test]
fn test_computed_field_filter_runs_after_transform() {
    let log_age = Field::measure("log_age", "Log age").with_expression(Expression::Log {
        field: "age".to_string(),
        base: 10.0,
    });
    let mut snap = snapshot();
    snap.all_fields.push(log_age.clone());
    snap.filters = vec![FilterField::new(
        log_age,
        FilterRule::Range { value: [0.0, 2.0] },
    )];

    let compiled = to_workflow(&snap).unwrap();
    let transform_at = compiled
        .steps
        .iter()
        .position(|s| matches!(s, WorkflowStep::Transform { .. }))
        .expect("has a transform step");
    let filter_at = compiled
        .steps
        .iter()
        .position(|s| matches!(s, WorkflowStep::Filter { .. }))
        .expect("has a filter step");
    assert!(transform_at < filter_at);
}

#[test]
fn test_unused_computed_fields_are_shaken() {
    let mut snap = snapshot();
    snap.all_fields.push(
        Field::measure("noise", "Noise").with_expression(Expression::Log {
            field: "age".to_string(),
            base: 2.0,
        }),
    );
    let compiled = to_workflow(&snap).unwrap();
    assert!(!compiled
        .steps
        .iter()
        .any(|s| matches!(s, WorkflowStep::Transform { .. })));
}

#[test]
fn test_sort_requires_limit() {
    let mut snap = snapshot();
    snap.sort = SortOrder::Descending;
    let compiled = to_workflow(&snap).unwrap();
    assert!(!compiled
        .steps
        .iter()
        .any(|s| matches!(s, WorkflowStep::Sort { .. })));

    snap.limit = Some(10);
    let compiled = to_workflow(&snap).unwrap();
    match compiled.steps.last().unwrap() {
        WorkflowStep::Sort { by, sort } => {
            assert_eq!(by, &vec!["age_mean".to_string()]);
            assert_eq!(*sort, SortOrder::Descending);
        }
        other => panic!("expected sort step, got {:?}", other),
    }
}

#[test]
fn test_unknown_field_fails_fast() {
    let mut snap = snapshot();
    snap.view_dimensions.push(Field::dimension("ghost", "Ghost"));
    assert_eq!(
        to_workflow(&snap).unwrap_err(),
        CompileError::UnknownField("ghost".to_string())
    );
}

#[test]
fn test_star_measure_only_counts() {
    let mut snap = snapshot();
    let star = Field::new("*", "Row count", AnalyticType::Measure, SemanticType::Quantitative)
        .with_agg(Aggregator::Sum);
    snap.all_fields.push(star.clone());
    snap.view_measures = vec![star];
    assert!(matches!(
        to_workflow(&snap).unwrap_err(),
        CompileError::StarAggregate(Aggregator::Sum)
    ));
}

#[test]
fn test_multi_dataset_compiles_join_step() {
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

    let join_at = compiled
        .steps
        .iter()
        .position(|s| matches!(s, WorkflowStep::Join { .. }))
        .expect("has a join step");
    let view_at = compiled
        .steps
        .iter()
        .position(|s| matches!(s, WorkflowStep::View { .. }))
        .expect("has a view step");
    assert!(join_at < view_at);

    // Both datasets participate and ids are namespaced.
    assert_eq!(compiled.datasets.len(), 2);
    match view_step(&compiled.steps) {
        ViewQuery::Aggregate { group_by, measures } => {
            assert!(group_by[0].contains('.') && group_by[0].ends_with(".name"));
            assert!(measures[0].field.contains('.') && measures[0].field.ends_with(".amount"));
        }
        other => panic!("expected aggregate view, got {:?}", other),
    }
}

#[test]
fn test_unlinked_dataset_is_excluded_not_an_error() {
    let order_amount = Field::measure("amount", "Amount")
        .with_dataset("orders")
        .with_agg(Aggregator::Sum);
    let stray = Field::dimension("label", "Label").with_dataset("stray");

    let snap = ViewSnapshot {
        all_fields: vec![order_amount.clone(), stray.clone()],
        view_dimensions: vec![stray],
        view_measures: vec![order_amount],
        default_aggregated: true,
        ..ViewSnapshot::default()
    };
    let compiled = to_workflow(&snap).unwrap();
    assert_eq!(compiled.unlinked, vec!["stray".to_string()]);
    match view_step(&compiled.steps) {
        ViewQuery::Aggregate { group_by, .. } => assert!(group_by.is_empty()),
        other => panic!("expected aggregate view, got {:?}", other),
    }
}
