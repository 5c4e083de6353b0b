use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of binary a library vertex stands for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryKind {
    Executable,
    Shared,
}

impl LibraryKind {
    /// Encode for storage in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            LibraryKind::Executable => "EXECUTABLE",
            LibraryKind::Shared => "SHARED",
        }
    }

    /// Decode from a stored string. Unknown values are read back as shared objects.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "EXECUTABLE" | "EXEC" => LibraryKind::Executable,
            _ => LibraryKind::Shared,
        }
    }
}

/// How indirect calls inside one library are approximated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    /// One bridge per library joining every indirect source to every indirect target.
    #[default]
    Coarse,
    /// One bridge per argument signature among the library's indirect targets.
    Precise,
}

impl BridgeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeMode::Coarse => "coarse",
            BridgeMode::Precise => "precise",
        }
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "precise" => BridgeMode::Precise,
            _ => BridgeMode::Coarse,
        }
    }
}

/// A function known to live in one library of one package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionVertex {
    pub key: String,
    /// Symbol as it appeared in the call-graph facts.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    pub size: u64,
    /// Owning library SONAME (unsanitized).
    pub library: String,
    /// Key of the owning library vertex.
    pub library_key: String,
    /// Owning package name (unsanitized).
    pub package: String,
    pub exported: bool,
    /// Function performs indirect calls.
    pub implicit_source: bool,
    /// Function address is taken. Only ever promoted from false to true.
    pub implicit_target: bool,
    /// Set when `implicit_target` was promoted by a later ingestion.
    pub target_updated: bool,
    /// Parameter types, when a ground-truth pass supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_types: Option<Vec<String>>,
    /// Argument types of each indirect call site inside this function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_site_args: Vec<Vec<String>>,
}

/// A binary (executable or shared object) shipped by a package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryVertex {
    pub key: String,
    pub soname: String,
    pub package: String,
    pub arch: Option<String>,
    pub elf_class: Option<String>,
    pub kind: LibraryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageVertex {
    pub key: String,
    pub name: String,
}

/// A known vulnerability and the libraries/packages it was reported against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CveVertex {
    pub id: String,
    /// Set by the first record seen for this CVE and never changed afterwards.
    pub status: Option<String>,
    pub libraries: Vec<String>,
    pub packages: Vec<String>,
}

/// Synthetic vertex standing for a class of indirect-call resolutions inside a library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeVertex {
    pub key: String,
    pub library_key: String,
    pub mode: BridgeMode,
    pub selector: String,
}

/// Which side of a CVE an accumulated fact describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CveFactKind {
    Library,
    Package,
}

impl CveFactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CveFactKind::Library => "library",
            CveFactKind::Package => "package",
        }
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "package" => CveFactKind::Package,
            _ => CveFactKind::Library,
        }
    }
}

/// Vertex collections in the graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Functions,
    Libraries,
    Packages,
    Cves,
    Bridges,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Functions => "functions",
            Collection::Libraries => "libraries",
            Collection::Packages => "packages",
            Collection::Cves => "cves",
            Collection::Bridges => "bridges",
        }
    }
}

/// Collection-qualified vertex identity, displayed as `collection/key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId {
    pub collection: Collection,
    pub key: String,
}

impl VertexId {
    pub fn new(collection: Collection, key: impl Into<String>) -> Self {
        Self { collection, key: key.into() }
    }

    pub fn function(key: impl Into<String>) -> Self {
        Self::new(Collection::Functions, key)
    }

    pub fn library(key: impl Into<String>) -> Self {
        Self::new(Collection::Libraries, key)
    }

    pub fn package(key: impl Into<String>) -> Self {
        Self::new(Collection::Packages, key)
    }

    pub fn bridge(key: impl Into<String>) -> Self {
        Self::new(Collection::Bridges, key)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.key)
    }
}

/// Edge collections. Each kind fixes the collections of both endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DirectCall,
    IndirectCallOut,
    IndirectCallIn,
    LibraryDependsOn,
    PackageDependsOn,
    CveAffects,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 6] = [
        EdgeKind::DirectCall,
        EdgeKind::IndirectCallOut,
        EdgeKind::IndirectCallIn,
        EdgeKind::LibraryDependsOn,
        EdgeKind::PackageDependsOn,
        EdgeKind::CveAffects,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::DirectCall => "direct_calls",
            EdgeKind::IndirectCallOut => "indirect_calls_out",
            EdgeKind::IndirectCallIn => "indirect_calls_in",
            EdgeKind::LibraryDependsOn => "depends_on",
            EdgeKind::PackageDependsOn => "package_depends",
            EdgeKind::CveAffects => "cve_affects",
        }
    }

    pub fn from_collection(self) -> Collection {
        match self {
            EdgeKind::DirectCall | EdgeKind::IndirectCallOut => Collection::Functions,
            EdgeKind::IndirectCallIn => Collection::Bridges,
            EdgeKind::LibraryDependsOn => Collection::Libraries,
            EdgeKind::PackageDependsOn => Collection::Packages,
            EdgeKind::CveAffects => Collection::Cves,
        }
    }

    pub fn to_collection(self) -> Collection {
        match self {
            EdgeKind::DirectCall | EdgeKind::IndirectCallIn | EdgeKind::CveAffects => {
                Collection::Functions
            }
            EdgeKind::IndirectCallOut => Collection::Bridges,
            EdgeKind::LibraryDependsOn => Collection::Libraries,
            EdgeKind::PackageDependsOn => Collection::Packages,
        }
    }
}

/// A stored edge. Endpoints are plain keys; their collections follow from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub kind: EdgeKind,
    pub key: String,
    pub from: String,
    pub to: String,
}

impl Edge {
    /// Build an edge keyed by the hash of its endpoints.
    pub fn between(kind: EdgeKind, from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        let key = crate::keys::edge_key(&from, &to);
        Self { kind, key, from, to }
    }
}

/// Traversal direction along edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges from source to target ("what does this reach").
    Outbound,
    /// Follow edges from target to source ("what reaches this").
    Inbound,
}
