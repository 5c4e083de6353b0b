use tempfile::tempdir;
use vulnreach_core::db::{
    BridgeMode, Collection, CveFactKind, CveVertex, Direction, Edge, EdgeKind, FunctionVertex,
    GraphDb, LibraryKind, LibraryVertex, PackageVertex, VertexId, CURRENT_SCHEMA_VERSION,
};
use vulnreach_core::graph::{GraphStore, StoreError};
use vulnreach_core::keys::{function_key, library_key};

fn function(symbol: &str, soname: &str, package: &str) -> FunctionVertex {
    FunctionVertex {
        key: function_key(symbol, soname, package),
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        size: 16,
        library: soname.to_string(),
        library_key: library_key(soname, package),
        package: package.to_string(),
        exported: true,
        implicit_source: false,
        implicit_target: false,
        target_updated: false,
        arg_types: None,
        call_site_args: Vec::new(),
    }
}

#[test]
fn new_database_is_at_current_schema_version() {
    let db = GraphDb::open_in_memory().expect("open in-memory db");
    assert_eq!(db.schema_version().expect("schema version"), CURRENT_SCHEMA_VERSION);
}

#[test]
fn reopening_existing_database_keeps_data() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");

    {
        let db = GraphDb::open(&path).expect("open db");
        db.insert_package(&PackageVertex { key: "libc6".into(), name: "libc6".into() })
            .expect("insert package");
    }

    let db = GraphDb::open(&path).expect("reopen db");
    assert_eq!(db.schema_version().expect("schema version"), CURRENT_SCHEMA_VERSION);
    let package = db.get_package("libc6").expect("get package").expect("package present");
    assert_eq!(package.name, "libc6");
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    {
        let db = GraphDb::open(&path).expect("open db");
        db.connection().execute_batch("PRAGMA user_version = 99;").expect("bump version");
    }

    match GraphDb::open(&path) {
        Err(StoreError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("expected unsupported schema version, got {other:?}"),
    }
}

#[test]
fn inserts_are_insert_if_absent() {
    let db = GraphDb::open_in_memory().expect("open db");
    let f = function("main", "app", "apppkg");

    assert!(db.insert_function(&f).expect("first insert"));
    let mut changed = f.clone();
    changed.size = 999;
    assert!(!db.insert_function(&changed).expect("second insert"));
    assert_eq!(db.get_function(&f.key).expect("get").expect("present").size, 16);

    let library = LibraryVertex {
        key: library_key("app", "apppkg"),
        soname: "app".into(),
        package: "apppkg".into(),
        arch: None,
        elf_class: None,
        kind: LibraryKind::Executable,
    };
    assert!(db.insert_library(&library).expect("insert library"));
    assert!(!db.insert_library(&library).expect("reinsert library"));

    let edge = Edge::between(EdgeKind::DirectCall, "a", "b");
    assert!(db.insert_edge(&edge).expect("insert edge"));
    assert!(!db.insert_edge(&edge).expect("reinsert edge"));
    assert_eq!(db.count_edges(EdgeKind::DirectCall).expect("count"), 1);
}

#[test]
fn promotion_only_flips_once() {
    let db = GraphDb::open_in_memory().expect("open db");
    let f = function("cb", "libx.so", "x");
    db.insert_function(&f).expect("insert");

    assert!(db.promote_implicit_target(&f.key).expect("promote"));
    assert!(!db.promote_implicit_target(&f.key).expect("promote again"));

    let stored = db.get_function(&f.key).expect("get").expect("present");
    assert!(stored.implicit_target);
    assert!(stored.target_updated);
}

#[test]
fn signatures_round_trip_through_storage() {
    let db = GraphDb::open_in_memory().expect("open db");
    let f = function("worker", "libx.so", "x");
    db.insert_function(&f).expect("insert");

    let args = vec!["i32".to_string(), "ptr".to_string()];
    let sites = vec![vec!["ptr".to_string()]];
    db.set_function_signatures(&f.key, Some(&args), &sites).expect("set signatures");

    let stored = db.get_function(&f.key).expect("get").expect("present");
    assert_eq!(stored.arg_types, Some(args));
    assert_eq!(stored.call_site_args, sites);
}

#[test]
fn shipping_index_keeps_first_recorded_order() {
    let db = GraphDb::open_in_memory().expect("open db");
    db.record_shipping("libssl.so.3", "libssl3").expect("record");
    db.record_shipping("libssl.so.3", "libssl3-compat").expect("record");
    db.record_shipping("libssl.so.3", "libssl3").expect("record duplicate");

    assert_eq!(
        db.shipping_packages("libssl.so.3").expect("shipping"),
        vec!["libssl3".to_string(), "libssl3-compat".to_string()]
    );
    assert!(db.shipping_packages("libnone.so").expect("shipping").is_empty());
}

#[test]
fn cve_status_is_kept_from_first_insert_and_facts_dedup() {
    let db = GraphDb::open_in_memory().expect("open db");
    let first = CveVertex {
        id: "CVE-2024-0001".into(),
        status: Some("open".into()),
        libraries: Vec::new(),
        packages: Vec::new(),
    };
    assert!(db.insert_cve(&first).expect("insert"));
    let second = CveVertex { status: Some("fixed".into()), ..first.clone() };
    assert!(!db.insert_cve(&second).expect("reinsert"));
    assert_eq!(db.get_cve("CVE-2024-0001").expect("get").expect("present").status.as_deref(), Some("open"));

    db.append_cve_fact("CVE-2024-0001", CveFactKind::Library, "libx.so").expect("fact");
    db.append_cve_fact("CVE-2024-0001", CveFactKind::Package, "x").expect("fact");
    db.append_cve_fact("CVE-2024-0001", CveFactKind::Library, "libx.so").expect("dup fact");
    assert_eq!(
        db.cve_facts("CVE-2024-0001").expect("facts"),
        vec![(CveFactKind::Library, "libx.so".to_string()), (CveFactKind::Package, "x".to_string())]
    );
}

#[test]
fn bridge_mode_defaults_to_coarse() {
    let db = GraphDb::open_in_memory().expect("open db");
    let lib = library_key("libx.so", "x");
    assert_eq!(db.bridge_mode(&lib).expect("mode"), BridgeMode::Coarse);

    db.set_bridge_mode(&lib, BridgeMode::Precise).expect("set");
    assert_eq!(db.bridge_mode(&lib).expect("mode"), BridgeMode::Precise);
    db.set_bridge_mode(&lib, BridgeMode::Coarse).expect("set back");
    assert_eq!(db.bridge_mode(&lib).expect("mode"), BridgeMode::Coarse);
}

#[test]
fn neighbors_respect_edge_collections() {
    let db = GraphDb::open_in_memory().expect("open db");
    db.insert_edge(&Edge::between(EdgeKind::DirectCall, "a", "b")).expect("edge");
    db.insert_edge(&Edge::between(EdgeKind::IndirectCallOut, "a", "br-bridge")).expect("edge");
    db.insert_edge(&Edge::between(EdgeKind::IndirectCallIn, "br-bridge", "c")).expect("edge");

    let kinds = [EdgeKind::DirectCall, EdgeKind::IndirectCallOut, EdgeKind::IndirectCallIn];
    let mut out = db.neighbors(&kinds, &VertexId::function("a"), Direction::Outbound).expect("out");
    out.sort();
    assert_eq!(out, vec![VertexId::function("b"), VertexId::bridge("br-bridge")]);

    let into_c = db.neighbors(&kinds, &VertexId::function("c"), Direction::Inbound).expect("in");
    assert_eq!(into_c, vec![VertexId::bridge("br-bridge")]);

    // A bridge is not a function, so direct-call lookups keyed on it find nothing.
    let from_bridge = db
        .neighbors(&[EdgeKind::DirectCall], &VertexId::bridge("br-bridge"), Direction::Outbound)
        .expect("bridge neighbors");
    assert!(from_bridge.is_empty());
}

#[test]
fn failed_transaction_rolls_back() {
    let db = GraphDb::open_in_memory().expect("open db");
    let result: Result<(), StoreError> = db.in_transaction(|tx| {
        tx.insert_package(&PackageVertex { key: "p".into(), name: "p".into() })?;
        Err(StoreError::TraversalTimeout { start: "x".into(), elapsed_ms: 0 })
    });
    assert!(result.is_err());
    assert_eq!(db.count_vertices(Collection::Packages).expect("count"), 0);

    db.in_transaction(|tx| {
        tx.insert_package(&PackageVertex { key: "p".into(), name: "p".into() })?;
        tx.in_transaction(|inner| {
            inner.insert_package(&PackageVertex { key: "q".into(), name: "q".into() })
        })
    })
    .expect("nested transaction");
    assert_eq!(db.count_vertices(Collection::Packages).expect("count"), 2);
}
