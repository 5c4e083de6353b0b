use std::collections::HashSet;
use std::time::Duration;

use vulnreach_core::db::{Direction, Edge, EdgeKind, GraphDb, VertexId};
use vulnreach_core::graph::{GraphKind, GraphStore, StoreError, TraversalLimits};

fn calls(db: &GraphDb, pairs: &[(&str, &str)]) {
    for (from, to) in pairs {
        db.insert_edge(&Edge::between(EdgeKind::DirectCall, *from, *to)).expect("insert edge");
    }
}

fn keys(ids: &[VertexId]) -> Vec<&str> {
    ids.iter().map(|id| id.key.as_str()).collect()
}

#[test]
fn cyclic_call_graph_terminates_with_unique_vertices() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("b", "d")]);

    let reached = db
        .traverse(
            GraphKind::CallGraph,
            &VertexId::function("a"),
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");

    assert_eq!(reached.first(), Some(&VertexId::function("b")));
    let mut sorted = keys(&reached);
    sorted.sort();
    assert_eq!(sorted, vec!["b", "c", "d"]);
    let unique: HashSet<_> = reached.iter().collect();
    assert_eq!(unique.len(), reached.len());
}

#[test]
fn inbound_traversal_follows_edges_backwards() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("main", "parse"), ("parse", "read"), ("other", "read")]);

    let mut reached = keys(
        &db.traverse(
            GraphKind::CallGraph,
            &VertexId::function("read"),
            Direction::Inbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse"),
    )
    .into_iter()
    .map(str::to_string)
    .collect::<Vec<_>>();
    reached.sort();
    assert_eq!(reached, vec!["main", "other", "parse"]);
}

#[test]
fn bridges_are_pass_through_hops() {
    let db = GraphDb::open_in_memory().expect("open db");
    db.insert_edge(&Edge::between(EdgeKind::IndirectCallOut, "caller", "x-bridge")).expect("edge");
    db.insert_edge(&Edge::between(EdgeKind::IndirectCallIn, "x-bridge", "callback")).expect("edge");

    let reached = db
        .traverse(
            GraphKind::CallGraph,
            &VertexId::function("caller"),
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");
    assert_eq!(reached, vec![VertexId::bridge("x-bridge"), VertexId::function("callback")]);

    let back = db
        .traverse(
            GraphKind::CallGraph,
            &VertexId::function("callback"),
            Direction::Inbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");
    assert_eq!(back, vec![VertexId::bridge("x-bridge"), VertexId::function("caller")]);
}

#[test]
fn graph_kinds_do_not_mix_edge_collections() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("a", "b")]);
    db.insert_edge(&Edge::between(EdgeKind::LibraryDependsOn, "a", "libz")).expect("edge");

    let call_reach = db
        .traverse(
            GraphKind::CallGraph,
            &VertexId::function("a"),
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");
    assert_eq!(call_reach, vec![VertexId::function("b")]);

    let library_reach = db
        .traverse(
            GraphKind::LibraryGraph,
            &VertexId::library("a"),
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");
    assert_eq!(library_reach, vec![VertexId::library("libz")]);
}

#[test]
fn max_depth_bounds_the_search() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("a", "b"), ("b", "c"), ("c", "d")]);

    let limits = TraversalLimits { max_depth: Some(2), timeout: None };
    let reached = db
        .traverse(GraphKind::CallGraph, &VertexId::function("a"), Direction::Outbound, &limits)
        .expect("traverse");
    assert_eq!(keys(&reached), vec!["b", "c"]);
}

#[test]
fn multi_start_traversal_shares_one_visited_set() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("a", "shared"), ("b", "shared"), ("shared", "leaf"), ("a", "b")]);

    let reached = db
        .traverse_from(
            GraphKind::CallGraph,
            &[VertexId::function("a"), VertexId::function("b")],
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )
        .expect("traverse");
    let mut reached = keys(&reached);
    reached.sort();
    assert_eq!(reached, vec!["leaf", "shared"]);
}

#[test]
fn elapsed_timeout_is_reported_as_error() {
    let db = GraphDb::open_in_memory().expect("open db");
    calls(&db, &[("a", "b")]);

    let limits = TraversalLimits { max_depth: None, timeout: Some(Duration::ZERO) };
    let err = db
        .traverse(GraphKind::CallGraph, &VertexId::function("a"), Direction::Outbound, &limits)
        .expect_err("zero timeout");
    match err {
        StoreError::TraversalTimeout { start, .. } => assert_eq!(start, "functions/a"),
        other => panic!("expected timeout, got {other:?}"),
    }
}
