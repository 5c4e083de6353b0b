use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::db::models::{
    BridgeMode, BridgeVertex, Collection, CveFactKind, CveVertex, Direction, Edge, EdgeKind,
    FunctionVertex, LibraryKind, LibraryVertex, PackageVertex, VertexId,
};
use crate::graph::{GraphStore, StoreError, StoreResult};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

const FUNCTION_COLUMNS: &str = "key, symbol, name, size, soname, library_key, package, exported, \
     implicit_source, implicit_target, target_updated, arg_types, call_site_args";

/// SQLite-backed graph store.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible for:
/// - Opening/creating the DB file in WAL mode so several worker connections can share it.
/// - Applying schema migrations.
/// - Implementing [`GraphStore`] on top of plain tables.
#[derive(Debug)]
pub struct GraphDb {
    conn: Connection,
}

impl GraphDb {
    /// Open (or create) a graph database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Like [`GraphDb::open`], waiting up to `busy_timeout_ms` on a locked database.
    pub fn open_with_timeout(path: &Path, busy_timeout_ms: u64) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open a private in-memory graph (used by tests and one-shot tools).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer the [`GraphStore`] methods.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> StoreResult<i32> {
        current_schema_version(&self.conn)
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Sql(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

fn map_function(row: &Row<'_>) -> rusqlite::Result<FunctionVertex> {
    let arg_types: Option<String> = row.get(11)?;
    let arg_types = match arg_types {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(FunctionVertex {
        key: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        library: row.get(4)?,
        library_key: row.get(5)?,
        package: row.get(6)?,
        exported: row.get(7)?,
        implicit_source: row.get(8)?,
        implicit_target: row.get(9)?,
        target_updated: row.get(10)?,
        arg_types,
        call_site_args: json_column(row, 12)?,
    })
}

fn map_library(row: &Row<'_>) -> rusqlite::Result<LibraryVertex> {
    let kind: String = row.get(5)?;
    Ok(LibraryVertex {
        key: row.get(0)?,
        soname: row.get(1)?,
        package: row.get(2)?,
        arch: row.get(3)?,
        elf_class: row.get(4)?,
        kind: LibraryKind::from_str_lossy(&kind),
    })
}

fn map_cve(row: &Row<'_>) -> rusqlite::Result<CveVertex> {
    Ok(CveVertex {
        id: row.get(0)?,
        status: row.get(1)?,
        libraries: json_column(row, 2)?,
        packages: json_column(row, 3)?,
    })
}

fn map_bridge(row: &Row<'_>) -> rusqlite::Result<BridgeVertex> {
    let mode: String = row.get(2)?;
    Ok(BridgeVertex {
        key: row.get(0)?,
        library_key: row.get(1)?,
        mode: BridgeMode::from_str_lossy(&mode),
        selector: row.get(3)?,
    })
}

fn vertex_table(collection: Collection) -> (&'static str, &'static str) {
    match collection {
        Collection::Functions => ("functions", "key"),
        Collection::Libraries => ("libraries", "key"),
        Collection::Packages => ("packages", "key"),
        Collection::Cves => ("cves", "id"),
        Collection::Bridges => ("bridges", "key"),
    }
}

impl GraphStore for GraphDb {
    fn insert_package(&self, package: &PackageVertex) -> StoreResult<bool> {
        let inserted = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO packages (key, name) VALUES (?1, ?2)",
        )?
        .execute(params![package.key, package.name])?;
        Ok(inserted > 0)
    }

    fn get_package(&self, key: &str) -> StoreResult<Option<PackageVertex>> {
        let package = self
            .conn
            .query_row("SELECT key, name FROM packages WHERE key = ?1", params![key], |row| {
                Ok(PackageVertex { key: row.get(0)?, name: row.get(1)? })
            })
            .optional()?;
        Ok(package)
    }

    fn insert_library(&self, library: &LibraryVertex) -> StoreResult<bool> {
        let inserted = self
            .conn
            .prepare_cached(
                r#"
                INSERT OR IGNORE INTO libraries (key, soname, package, arch, elf_class, kind)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?
            .execute(params![
                library.key,
                library.soname,
                library.package,
                library.arch,
                library.elf_class,
                library.kind.as_str()
            ])?;
        Ok(inserted > 0)
    }

    fn get_library(&self, key: &str) -> StoreResult<Option<LibraryVertex>> {
        let library = self
            .conn
            .query_row(
                "SELECT key, soname, package, arch, elf_class, kind FROM libraries WHERE key = ?1",
                params![key],
                map_library,
            )
            .optional()?;
        Ok(library)
    }

    fn list_libraries(&self) -> StoreResult<Vec<LibraryVertex>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT key, soname, package, arch, elf_class, kind
            FROM libraries
            ORDER BY key
            "#,
        )?;
        let rows = stmt.query_map([], map_library)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn insert_function(&self, function: &FunctionVertex) -> StoreResult<bool> {
        let arg_types = match &function.arg_types {
            Some(types) => Some(to_json(types)?),
            None => None,
        };
        let call_site_args = to_json(&function.call_site_args)?;
        let inserted = self
            .conn
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO functions ({FUNCTION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ))?
            .execute(params![
                function.key,
                function.symbol,
                function.name,
                function.size as i64,
                function.library,
                function.library_key,
                function.package,
                function.exported,
                function.implicit_source,
                function.implicit_target,
                function.target_updated,
                arg_types,
                call_site_args
            ])?;
        Ok(inserted > 0)
    }

    fn get_function(&self, key: &str) -> StoreResult<Option<FunctionVertex>> {
        let function = self
            .conn
            .query_row(
                &format!("SELECT {FUNCTION_COLUMNS} FROM functions WHERE key = ?1"),
                params![key],
                map_function,
            )
            .optional()?;
        Ok(function)
    }

    fn functions_of_library(&self, library_key: &str) -> StoreResult<Vec<FunctionVertex>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions WHERE library_key = ?1 ORDER BY key"
        ))?;
        let rows = stmt.query_map(params![library_key], map_function)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn promote_implicit_target(&self, key: &str) -> StoreResult<bool> {
        let changed = self
            .conn
            .prepare_cached(
                r#"
                UPDATE functions
                SET implicit_target = 1, target_updated = 1
                WHERE key = ?1 AND implicit_target = 0
                "#,
            )?
            .execute(params![key])?;
        Ok(changed > 0)
    }

    fn set_function_signatures(
        &self,
        key: &str,
        arg_types: Option<&[String]>,
        call_site_args: &[Vec<String>],
    ) -> StoreResult<()> {
        let arg_types = match arg_types {
            Some(types) => Some(to_json(types)?),
            None => None,
        };
        self.conn.execute(
            "UPDATE functions SET arg_types = ?2, call_site_args = ?3 WHERE key = ?1",
            params![key, arg_types, to_json(call_site_args)?],
        )?;
        Ok(())
    }

    fn record_shipping(&self, soname: &str, package: &str) -> StoreResult<()> {
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO shipped_by (soname, package) VALUES (?1, ?2)")?
            .execute(params![soname, package])?;
        Ok(())
    }

    fn shipping_packages(&self, soname: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT package FROM shipped_by WHERE soname = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![soname], |row| row.get(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn insert_cve(&self, cve: &CveVertex) -> StoreResult<bool> {
        let inserted = self
            .conn
            .prepare_cached(
                r#"
                INSERT OR IGNORE INTO cves (id, status, libraries, packages)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?
            .execute(params![cve.id, cve.status, to_json(&cve.libraries)?, to_json(&cve.packages)?])?;
        Ok(inserted > 0)
    }

    fn get_cve(&self, id: &str) -> StoreResult<Option<CveVertex>> {
        let cve = self
            .conn
            .query_row(
                "SELECT id, status, libraries, packages FROM cves WHERE id = ?1",
                params![id],
                map_cve,
            )
            .optional()?;
        Ok(cve)
    }

    fn list_cves(&self) -> StoreResult<Vec<CveVertex>> {
        let mut stmt =
            self.conn.prepare("SELECT id, status, libraries, packages FROM cves ORDER BY id")?;
        let rows = stmt.query_map([], map_cve)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn append_cve_fact(&self, cve: &str, kind: CveFactKind, value: &str) -> StoreResult<()> {
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO cve_fact_log (cve, kind, value) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![cve, kind.as_str(), value])?;
        Ok(())
    }

    fn cve_facts(&self, cve: &str) -> StoreResult<Vec<(CveFactKind, String)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT kind, value FROM cve_fact_log WHERE cve = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![cve], |row| {
            let kind: String = row.get(0)?;
            Ok((CveFactKind::from_str_lossy(&kind), row.get(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn set_cve_lists(
        &self,
        cve: &str,
        libraries: &[String],
        packages: &[String],
    ) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE cves SET libraries = ?2, packages = ?3 WHERE id = ?1",
            params![cve, to_json(libraries)?, to_json(packages)?],
        )?;
        Ok(())
    }

    fn insert_bridge(&self, bridge: &BridgeVertex) -> StoreResult<bool> {
        let inserted = self
            .conn
            .prepare_cached(
                r#"
                INSERT OR IGNORE INTO bridges (key, library_key, mode, selector)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?
            .execute(params![bridge.key, bridge.library_key, bridge.mode.as_str(), bridge.selector])?;
        Ok(inserted > 0)
    }

    fn bridges_of_library(&self, library_key: &str) -> StoreResult<Vec<BridgeVertex>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT key, library_key, mode, selector
            FROM bridges
            WHERE library_key = ?1
            ORDER BY key
            "#,
        )?;
        let rows = stmt.query_map(params![library_key], map_bridge)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn remove_bridge(&self, key: &str) -> StoreResult<bool> {
        let removed = self.conn.execute("DELETE FROM bridges WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn bridge_mode(&self, library_key: &str) -> StoreResult<BridgeMode> {
        let mode: Option<String> = self
            .conn
            .prepare_cached("SELECT mode FROM bridge_modes WHERE library_key = ?1")?
            .query_row(params![library_key], |row| row.get(0))
            .optional()?;
        Ok(mode.map(|m| BridgeMode::from_str_lossy(&m)).unwrap_or_default())
    }

    fn set_bridge_mode(&self, library_key: &str, mode: BridgeMode) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO bridge_modes (library_key, mode) VALUES (?1, ?2)
            ON CONFLICT(library_key) DO UPDATE SET mode = excluded.mode
            "#,
            params![library_key, mode.as_str()],
        )?;
        Ok(())
    }

    fn insert_edge(&self, edge: &Edge) -> StoreResult<bool> {
        let inserted = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO edges (kind, key, src, dst) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![edge.kind.as_str(), edge.key, edge.from, edge.to])?;
        Ok(inserted > 0)
    }

    fn remove_edge(&self, kind: EdgeKind, key: &str) -> StoreResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM edges WHERE kind = ?1 AND key = ?2", params![kind.as_str(), key])?;
        Ok(removed > 0)
    }

    fn edges_touching(&self, kind: EdgeKind, key: &str) -> StoreResult<Vec<Edge>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT key, src, dst
            FROM edges
            WHERE kind = ?1 AND (src = ?2 OR dst = ?2)
            ORDER BY key
            "#,
        )?;
        let rows = stmt.query_map(params![kind.as_str(), key], |row| {
            Ok(Edge { kind, key: row.get(0)?, from: row.get(1)?, to: row.get(2)? })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn edges(&self, kind: EdgeKind) -> StoreResult<Vec<Edge>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, src, dst FROM edges WHERE kind = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok(Edge { kind, key: row.get(0)?, from: row.get(1)?, to: row.get(2)? })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn neighbors(
        &self,
        kinds: &[EdgeKind],
        id: &VertexId,
        direction: Direction,
    ) -> StoreResult<Vec<VertexId>> {
        let mut out = Vec::new();
        for kind in kinds {
            let (anchor, other, sql) = match direction {
                Direction::Outbound => (
                    kind.from_collection(),
                    kind.to_collection(),
                    "SELECT dst FROM edges WHERE kind = ?1 AND src = ?2",
                ),
                Direction::Inbound => (
                    kind.to_collection(),
                    kind.from_collection(),
                    "SELECT src FROM edges WHERE kind = ?1 AND dst = ?2",
                ),
            };
            if anchor != id.collection {
                continue;
            }
            let mut stmt = self.conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params![kind.as_str(), id.key], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.push(VertexId::new(other, row?));
            }
        }
        Ok(out)
    }

    fn vertex_exists(&self, id: &VertexId) -> StoreResult<bool> {
        let (table, column) = vertex_table(id.collection);
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE {column} = ?1"),
                params![id.key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_vertices(&self, collection: Collection) -> StoreResult<u64> {
        let (table, _) = vertex_table(collection);
        let count: i64 =
            self.conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_edges(&self, kind: EdgeKind) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn in_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Self) -> StoreResult<T>,
    {
        // Nested calls join the outer transaction.
        if !self.conn.is_autocommit() {
            return f(self);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: packages, libraries, shipping index, functions, edges
/// - 2: CVEs and the per-CVE fact log
/// - 3: bridges, bridge modes, function signature columns (guarded in code)
fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS packages (
                key  TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS libraries (
                key       TEXT PRIMARY KEY,
                soname    TEXT NOT NULL,
                package   TEXT NOT NULL,
                arch      TEXT,
                elf_class TEXT,
                kind      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS shipped_by (
                soname  TEXT NOT NULL,
                package TEXT NOT NULL,
                PRIMARY KEY (soname, package)
            );

            CREATE TABLE IF NOT EXISTS functions (
                key             TEXT PRIMARY KEY,
                symbol          TEXT NOT NULL,
                name            TEXT NOT NULL,
                size            INTEGER NOT NULL DEFAULT 0,
                soname          TEXT NOT NULL,
                library_key     TEXT NOT NULL,
                package         TEXT NOT NULL,
                exported        INTEGER NOT NULL DEFAULT 0,
                implicit_source INTEGER NOT NULL DEFAULT 0,
                implicit_target INTEGER NOT NULL DEFAULT 0,
                target_updated  INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_functions_library ON functions(library_key);

            CREATE TABLE IF NOT EXISTS edges (
                kind TEXT NOT NULL,
                key  TEXT NOT NULL,
                src  TEXT NOT NULL,
                dst  TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(kind, src);
            CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(kind, dst);

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS cves (
                id        TEXT PRIMARY KEY,
                status    TEXT,
                libraries TEXT NOT NULL DEFAULT '[]',
                packages  TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS cve_fact_log (
                id    INTEGER PRIMARY KEY AUTOINCREMENT,
                cve   TEXT NOT NULL,
                kind  TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE (cve, kind, value)
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 3 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS bridges (
                key         TEXT PRIMARY KEY,
                library_key TEXT NOT NULL,
                mode        TEXT NOT NULL,
                selector    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bridges_library ON bridges(library_key);

            CREATE TABLE IF NOT EXISTS bridge_modes (
                library_key TEXT PRIMARY KEY,
                mode        TEXT NOT NULL
            );
            COMMIT;
            "#,
        )?;
        if !column_exists(conn, "functions", "arg_types")? {
            conn.execute("ALTER TABLE functions ADD COLUMN arg_types TEXT", [])?;
        }
        if !column_exists(conn, "functions", "call_site_args")? {
            conn.execute(
                "ALTER TABLE functions ADD COLUMN call_site_args TEXT NOT NULL DEFAULT '[]'",
                [],
            )?;
        }
        conn.execute("PRAGMA user_version = 3;", [])?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> StoreResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
