use std::collections::BTreeSet;
use std::time::Duration;

use vulnreach_core::db::{Direction, GraphDb, LibraryFilter, LibraryKind};
use vulnreach_core::facts::{
    BinaryFacts, CveAffect, CveRecord, DynLinkFacts, FunctionFact, FunctionRef, SymbolBinding,
};
use vulnreach_core::graph::TraversalLimits;
use vulnreach_core::keys::{function_key, library_key};
use vulnreach_core::services::{
    build_library_graph, derive_package_graph, merge_cve_logs, record_cve, CveIndex, IngestEngine,
    ReachEngine,
};

fn func(library: &str, symbol: &str, exported: bool) -> FunctionFact {
    FunctionFact {
        symbol: symbol.to_string(),
        library: library.to_string(),
        size: 4,
        binding: if exported { SymbolBinding::Global } else { SymbolBinding::Local },
        dynamic_symbol: exported,
        implicit_source: false,
        implicit_target: false,
    }
}

fn fref(library: &str, symbol: &str) -> FunctionRef {
    FunctionRef { library: library.to_string(), symbol: symbol.to_string() }
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn owned<const N: usize>(keys: [String; N]) -> BTreeSet<String> {
    keys.into_iter().collect()
}

fn cve(id: &str, hits: &[(&str, &str, &str)]) -> CveRecord {
    CveRecord {
        id: id.to_string(),
        status: Some("open".to_string()),
        affects: hits
            .iter()
            .map(|(package, library, function)| CveAffect {
                package: package.to_string(),
                library: library.to_string(),
                function: function.to_string(),
            })
            .collect(),
    }
}

fn main_key() -> String {
    function_key("main", "app", "app1")
}

fn b_key(symbol: &str) -> String {
    function_key(symbol, "libb.so", "libb1")
}

fn c_free_key() -> String {
    function_key("c_free", "libc.so", "libc0")
}

/// Packages app1 -> libb1 -> libc0, one library each.
///
/// Calls: main -> b_entry -> b_vuln, main -> b_dispatch ~> (bridge) ~> b_cb -> c_free.
/// CVE-2024-0001 hits b_vuln and b_cb, CVE-2019-0002 hits c_free.
fn scenario() -> GraphDb {
    let db = GraphDb::open_in_memory().expect("open db");
    let dyn_facts = vec![
        DynLinkFacts::new("app1", "app", LibraryKind::Executable).with_needed(["libb.so"]),
        DynLinkFacts::new("libb1", "libb.so", LibraryKind::Shared).with_needed(["libc.so"]),
        DynLinkFacts::new("libc0", "libc.so", LibraryKind::Shared),
    ];
    build_library_graph(&db, &dyn_facts, &LibraryFilter::any()).expect("library graph");
    derive_package_graph(&db).expect("package graph");

    let mut dispatch = func("libb.so", "b_dispatch", true);
    dispatch.implicit_source = true;
    let mut callback = func("libb.so", "b_cb", false);
    callback.implicit_target = true;
    let facts = BinaryFacts {
        executable: "app".into(),
        package: "app1".into(),
        scope: vec!["libb.so".into(), "libc.so".into()],
        functions: vec![
            func("app", "main", false),
            func("libb.so", "b_entry", true),
            func("libb.so", "b_vuln", false),
            dispatch,
            callback,
            func("libc.so", "c_free", true),
        ],
        direct_edges: vec![
            (fref("app", "main"), fref("libb.so", "b_entry")),
            (fref("libb.so", "b_entry"), fref("libb.so", "b_vuln")),
            (fref("app", "main"), fref("libb.so", "b_dispatch")),
            (fref("libb.so", "b_cb"), fref("libc.so", "c_free")),
        ],
        indirect_sources: vec![fref("libb.so", "b_dispatch")],
        indirect_targets: vec![fref("libb.so", "b_cb")],
    };
    IngestEngine::new(&db).ingest_binary(&facts).expect("ingest");

    record_cve(
        &db,
        &cve(
            "CVE-2024-0001",
            &[
                ("libb1", "libb.so", "b_vuln"),
                ("libb1", "libb.so", "b_cb"),
                ("libb1", "libb.so", "ghost"),
            ],
        ),
    )
    .expect("record CVE-2024-0001");
    record_cve(&db, &cve("CVE-2019-0002", &[("libc0", "libc.so", "c_free")]))
        .expect("record CVE-2019-0002");
    merge_cve_logs(&db).expect("merge");
    db
}

#[test]
fn function_reach_includes_start_and_hides_bridges() {
    let db = scenario();
    let engine = ReachEngine::new(&db);

    let callers = engine.function_level_reach(&b_key("b_vuln"), Direction::Inbound).expect("reach");
    assert_eq!(callers, owned([b_key("b_vuln"), b_key("b_entry"), main_key()]));

    let reached = engine.function_level_reach(&main_key(), Direction::Outbound).expect("reach");
    let expected = owned([
        main_key(),
        b_key("b_entry"),
        b_key("b_vuln"),
        b_key("b_dispatch"),
        b_key("b_cb"),
        c_free_key(),
    ]);
    assert_eq!(reached, expected);
    assert!(reached.iter().all(|key| !key.ends_with("-bridge")));
}

#[test]
fn missing_start_vertex_has_empty_reach() {
    let db = scenario();
    let engine = ReachEngine::new(&db);
    assert!(engine.function_level_reach("nope@lib@pkg", Direction::Inbound).expect("reach").is_empty());
    assert!(engine.library_level_reach("nope@pkg", Direction::Inbound).expect("reach").is_empty());
    assert!(engine.package_level_reach("nope", Direction::Inbound).expect("reach").is_empty());
}

#[test]
fn library_and_package_reach_follow_dependency_graphs() {
    let db = scenario();
    let engine = ReachEngine::new(&db);

    let dependents = engine
        .library_level_reach(&library_key("libc.so", "libc0"), Direction::Inbound)
        .expect("reach");
    assert_eq!(
        dependents,
        owned([
            library_key("libc.so", "libc0"),
            library_key("libb.so", "libb1"),
            library_key("app", "app1"),
        ])
    );

    assert_eq!(
        engine.package_level_reach("libc0", Direction::Inbound).expect("reach"),
        set(&["libc0", "libb1", "app1"])
    );
    assert_eq!(
        engine.package_level_reach("libb1", Direction::Outbound).expect("reach"),
        set(&["libb1", "libc0"])
    );
}

#[test]
fn cve_impact_reports_each_affected_function() {
    let db = scenario();
    let impact = ReachEngine::new(&db)
        .cve_impact("CVE-2024-0001")
        .expect("impact")
        .expect("known CVE");

    assert_eq!(impact.status.as_deref(), Some("open"));
    assert_eq!(impact.missing_functions, vec![b_key("ghost")]);
    assert_eq!(impact.affected.len(), 2);

    let vuln = impact.affected.iter().find(|a| a.function == b_key("b_vuln")).expect("b_vuln");
    assert_eq!(vuln.function_reach_count, 3);
    assert!(vuln.function_reach.contains(&main_key()));
    assert_eq!(
        vuln.libraries_reached,
        owned([library_key("libb.so", "libb1"), library_key("app", "app1")])
    );
    assert_eq!(vuln.library_reach_count, 2);
    assert_eq!(vuln.package_reach, set(&["libb1", "app1"]));
    assert!(!vuln.timed_out);

    // Reached through the indirect-call bridge.
    let cb = impact.affected.iter().find(|a| a.function == b_key("b_cb")).expect("b_cb");
    assert_eq!(
        cb.function_reach,
        owned([b_key("b_cb"), b_key("b_dispatch"), main_key()])
    );

    assert!(ReachEngine::new(&db).cve_impact("CVE-1999-9999").expect("impact").is_none());
}

#[test]
fn cve_index_unions_without_double_counting() {
    let db = scenario();
    let index = CveIndex::build(&db, None).expect("index");
    assert_eq!(index.cve_count(), 2);
    assert_eq!(index.ids().collect::<Vec<_>>(), vec!["CVE-2019-0002", "CVE-2024-0001"]);

    let both = [b_key("b_vuln"), b_key("b_cb")];
    assert_eq!(index.union_over(both.iter()), set(&["CVE-2024-0001"]));
    assert_eq!(index.cves_naming_library("libc.so"), set(&["CVE-2019-0002"]));

    let recent = CveIndex::build(&db, Some(2020)).expect("index");
    assert_eq!(recent.cve_count(), 1);
    assert!(recent.cves_of(&c_free_key()).is_none());
}

#[test]
fn exported_surface_lists_cves_reachable_from_exports() {
    let db = scenario();
    let index = CveIndex::build(&db, None).expect("index");
    let surface = ReachEngine::new(&db)
        .exported_surface_impact(&library_key("libb.so", "libb1"), &index)
        .expect("surface");

    assert_eq!(surface.total_functions, 4);
    assert_eq!(surface.exported_functions.len(), 2);
    assert_eq!(surface.cves_reached, set(&["CVE-2019-0002", "CVE-2024-0001"]));

    let entry = surface.impacted.iter().find(|i| i.function == b_key("b_entry")).expect("b_entry");
    assert_eq!(entry.cves, set(&["CVE-2024-0001"]));
    let dispatch =
        surface.impacted.iter().find(|i| i.function == b_key("b_dispatch")).expect("b_dispatch");
    assert_eq!(dispatch.cves, set(&["CVE-2019-0002", "CVE-2024-0001"]));

    let recent = CveIndex::build(&db, Some(2020)).expect("index");
    let filtered = ReachEngine::new(&db)
        .exported_surface_impact(&library_key("libb.so", "libb1"), &recent)
        .expect("surface");
    assert_eq!(filtered.cves_reached, set(&["CVE-2024-0001"]));
}

#[test]
fn exposure_splits_call_and_dependency_paths() {
    let db = scenario();
    let index = CveIndex::build(&db, None).expect("index");
    let engine = ReachEngine::new(&db);

    let app = engine.cve_exposure(&library_key("app", "app1"), &index).expect("exposure");
    assert_eq!(app.function_cves, set(&["CVE-2019-0002", "CVE-2024-0001"]));
    assert_eq!(app.library_cves, set(&["CVE-2019-0002", "CVE-2024-0001"]));
    assert!(!app.timed_out);

    let libc = engine.cve_exposure(&library_key("libc.so", "libc0"), &index).expect("exposure");
    assert_eq!(libc.function_cves, set(&["CVE-2019-0002"]));
    assert_eq!(libc.library_cves, set(&["CVE-2019-0002"]));
}

#[test]
fn aggregate_queries_flag_timeouts_instead_of_failing() {
    let db = scenario();
    let limits = TraversalLimits { max_depth: None, timeout: Some(Duration::ZERO) };
    let engine = ReachEngine::new(&db).with_limits(limits);

    assert!(engine.function_level_reach(&main_key(), Direction::Outbound).is_err());

    let impact = engine.cve_impact("CVE-2024-0001").expect("impact").expect("known CVE");
    assert!(impact.affected.iter().all(|a| a.timed_out));

    let index = CveIndex::build(&db, None).expect("index");
    let surface = engine
        .exported_surface_impact(&library_key("libb.so", "libb1"), &index)
        .expect("surface");
    assert_eq!(surface.timed_out.len(), 2);
    assert!(surface.impacted.is_empty());

    let exposure = engine.cve_exposure(&library_key("app", "app1"), &index).expect("exposure");
    assert!(exposure.timed_out);
}
