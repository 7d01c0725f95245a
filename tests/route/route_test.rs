//! Tests for join path discovery and path algebra.

use std::collections::HashSet;

use vizflow::model::{AnalyticType, Field, SemanticType};
use vizflow::route::{
    base_alias, merge_paths, path_alias, reverse_paths, JoinPath, RouteMap,
};

/// orders -> users -> regions, plus a disconnected "logs" dataset.
fn fields() -> Vec<Field> {
    vec![
        Field::new("user_id", "user_id", AnalyticType::Dimension, SemanticType::Nominal)
            .with_dataset("orders")
            .with_foreign("users", "id"),
        Field::new("region_id", "region_id", AnalyticType::Dimension, SemanticType::Nominal)
            .with_dataset("users")
            .with_foreign("regions", "id"),
        Field::dimension("message", "message").with_dataset("logs"),
        Field::measure("amount", "amount").with_dataset("orders"),
    ]
}

#[test]
fn test_edges_are_bidirectional_and_deduplicated() {
    let map = RouteMap::from_fields(&fields());
    let from_orders = map.edges_from("orders");
    assert_eq!(from_orders.len(), 1);
    assert_eq!(from_orders[0], JoinPath::new("orders", "user_id", "users", "id"));

    let from_users = map.edges_from("users");
    let targets: HashSet<&str> = from_users.iter().map(|e| e.to.as_str()).collect();
    assert_eq!(targets, HashSet::from(["orders", "regions"]));
}

#[test]
fn test_route_is_first_discovered_path() {
    let map = RouteMap::from_fields(&fields());
    let path = map.route("orders", "regions").unwrap();
    assert_eq!(
        path,
        vec![
            JoinPath::new("orders", "user_id", "users", "id"),
            JoinPath::new("users", "region_id", "regions", "id"),
        ]
    );
    assert_eq!(map.route("orders", "orders"), Some(vec![]));
    assert_eq!(map.route("orders", "logs"), None);
}

#[test]
fn test_reachability_and_unlinked() {
    let map = RouteMap::from_fields(&fields());
    let reachable = map.reachable_from("orders");
    assert!(reachable.contains("regions"));
    assert!(!reachable.contains("logs"));
    assert_eq!(map.unlinked("orders"), vec!["logs".to_string()]);
}

#[test]
fn test_next_paths_blocks_banned_and_backtrack() {
    let map = RouteMap::from_fields(&fields());
    let into_users = JoinPath::new("orders", "user_id", "users", "id");

    // Fresh walk from users offers both neighbors.
    assert_eq!(map.next_paths("users", &HashSet::new(), None).len(), 2);

    // Arriving from orders blocks the immediate backtrack.
    let next = map.next_paths("users", &HashSet::new(), Some(&into_users));
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].to, "regions");

    // A banned edge is never offered again.
    let mut banned = HashSet::new();
    banned.insert(JoinPath::new("users", "region_id", "regions", "id"));
    let next = map.next_paths("users", &banned, Some(&into_users));
    assert!(next.is_empty());
}

#[test]
fn test_merge_and_reverse_compose() {
    let a = JoinPath::new("orders", "user_id", "users", "id");
    let b = JoinPath::new("users", "region_id", "regions", "id");
    let path = vec![a.clone(), b.clone()];

    // Walking out and straight back cancels.
    let mut out_and_back = path.clone();
    out_and_back.extend(reverse_paths(&path));
    assert_eq!(merge_paths(&out_and_back), Vec::<JoinPath>::new());

    // Reversing flips order and direction.
    assert_eq!(reverse_paths(&path), vec![b.reversed(), a.reversed()]);
}

#[test]
fn test_path_alias_distinguishes_paths() {
    let a = vec![JoinPath::new("orders", "user_id", "users", "id")];
    let b = vec![JoinPath::new("orders", "seller_id", "users", "id")];
    assert_ne!(path_alias(&a), path_alias(&b));
    assert_eq!(base_alias(), path_alias(&[]));
}
