//! Per-binary call-graph facts (sysfilter-style JSON).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::facts::{read_to_string, FactsError, FactsResult};

/// Library name used by the analyser for the analysed executable itself.
pub const EXECUTABLE_PLACEHOLDER: &str = "(executable)";

/// ELF symbol binding as reported by the analyser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymbolBinding {
    #[default]
    Local,
    Global,
    Weak,
    Other,
}

impl SymbolBinding {
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => SymbolBinding::Local,
            1 => SymbolBinding::Global,
            2 => SymbolBinding::Weak,
            _ => SymbolBinding::Other,
        }
    }
}

/// One function of the analysed load scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionFact {
    pub symbol: String,
    /// Owning library, already normalised (placeholder and paths resolved).
    pub library: String,
    pub size: u64,
    pub binding: SymbolBinding,
    pub dynamic_symbol: bool,
    pub implicit_source: bool,
    pub implicit_target: bool,
}

impl FunctionFact {
    /// Demangled display name, or the raw symbol when it is not an Itanium C++ mangling.
    pub fn demangled_name(&self) -> String {
        demangle(&self.symbol)
    }

    /// Visible to other binaries: a global dynamic symbol, or any weak symbol.
    pub fn exported(&self) -> bool {
        (self.dynamic_symbol && self.binding == SymbolBinding::Global)
            || self.binding == SymbolBinding::Weak
    }
}

/// Demangle an Itanium C++ symbol such as `_ZN3foo3barEv`.
/// Names without the `_Z` prefix are returned unchanged.
pub fn demangle(symbol: &str) -> String {
    if !symbol.starts_with("_Z") {
        return symbol.to_string();
    }
    cpp_demangle::Symbol::new(symbol)
        .ok()
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// Function identifier `library@function+offset`, normalised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionRef {
    pub library: String,
    pub symbol: String,
}

/// Everything one analysis run says about one binary and its load scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryFacts {
    /// File name of the analysed executable.
    pub executable: String,
    /// Package shipping the executable.
    pub package: String,
    /// Libraries in the load scope other than the executable.
    pub scope: Vec<String>,
    pub functions: Vec<FunctionFact>,
    pub direct_edges: Vec<(FunctionRef, FunctionRef)>,
    pub indirect_sources: Vec<FunctionRef>,
    pub indirect_targets: Vec<FunctionRef>,
}

#[derive(Debug, Deserialize)]
struct RawBinaryFacts {
    #[serde(default)]
    executable: Option<String>,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    analysis_scope: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    callgraph: Option<RawCallGraph>,
    #[serde(default)]
    vacuum: Option<RawVacuum>,
}

#[derive(Debug, Deserialize)]
struct RawVacuum {
    analysis: RawVacuumAnalysis,
}

#[derive(Debug, Deserialize)]
struct RawVacuumAnalysis {
    all: RawVacuumAll,
}

#[derive(Debug, Deserialize)]
struct RawVacuumAll {
    callgraph: RawCallGraph,
}

#[derive(Debug, Default, Deserialize)]
struct RawCallGraph {
    #[serde(default)]
    funcs: BTreeMap<String, RawFunction>,
    #[serde(default)]
    direct_edges: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    indirect_sources: Vec<String>,
    #[serde(default)]
    indirect_targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    lib: String,
    #[serde(default)]
    symbol_size: Option<u64>,
    #[serde(default)]
    binding_type: Option<u8>,
    #[serde(default)]
    dynamic_symbol: bool,
    #[serde(default)]
    implicit_source: bool,
    #[serde(default)]
    implicit_target: bool,
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve the analyser's library naming to a plain file name.
pub fn normalize_library(library: &str, executable: &str) -> String {
    if library == EXECUTABLE_PLACEHOLDER {
        executable.to_string()
    } else if library.starts_with('/') {
        base_name(library).to_string()
    } else {
        library.to_string()
    }
}

/// Parse `library@function+offset`. The offset is optional.
pub fn parse_function_ref(identifier: &str, executable: &str) -> FactsResult<FunctionRef> {
    let (library, rest) = identifier
        .split_once('@')
        .ok_or_else(|| FactsError::BadIdentifier(identifier.to_string()))?;
    let symbol = rest.split('+').next().unwrap_or(rest);
    if library.is_empty() || symbol.is_empty() {
        return Err(FactsError::BadIdentifier(identifier.to_string()));
    }
    Ok(FunctionRef {
        library: normalize_library(library, executable),
        symbol: symbol.to_string(),
    })
}

/// Drop leading debug output: the payload starts at the first line opening a JSON object.
fn json_payload(text: &str) -> FactsResult<&str> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('{') {
            return Ok(&text[offset..]);
        }
        offset += line.len();
    }
    Err(FactsError::NoJsonPayload)
}

fn executable_from_scope(scope: &BTreeMap<String, serde_json::Value>) -> Option<String> {
    if let Some(path) = scope
        .get(EXECUTABLE_PLACEHOLDER)
        .and_then(|entry| entry.get("path"))
        .and_then(|path| path.as_str())
    {
        return Some(base_name(path).to_string());
    }
    scope.keys().find(|name| name.starts_with('/')).map(|path| base_name(path).to_string())
}

impl BinaryFacts {
    /// Parse facts from text, using `default_package` when the record names none.
    pub fn parse(text: &str, default_package: Option<&str>) -> FactsResult<Self> {
        let raw: RawBinaryFacts = serde_json::from_str(json_payload(text)?)?;

        let executable = match raw.executable.as_deref() {
            Some(name) if !name.is_empty() => base_name(name).to_string(),
            _ => executable_from_scope(&raw.analysis_scope).ok_or(FactsError::MissingExecutable)?,
        };
        let package = raw
            .package
            .or_else(|| default_package.map(str::to_string))
            .ok_or_else(|| FactsError::MissingPackage(executable.clone()))?;

        let mut scope = Vec::new();
        for name in raw.analysis_scope.keys() {
            if name == EXECUTABLE_PLACEHOLDER {
                continue;
            }
            let library = normalize_library(name, &executable);
            if library != executable && !scope.contains(&library) {
                scope.push(library);
            }
        }

        let callgraph = match (raw.callgraph, raw.vacuum) {
            (Some(callgraph), _) => callgraph,
            (None, Some(vacuum)) => vacuum.analysis.all.callgraph,
            (None, None) => RawCallGraph::default(),
        };

        let functions = callgraph
            .funcs
            .into_values()
            .map(|f| FunctionFact {
                library: normalize_library(&f.lib, &executable),
                symbol: f.name,
                size: f.symbol_size.unwrap_or(0),
                binding: f.binding_type.map(SymbolBinding::from_raw).unwrap_or_default(),
                dynamic_symbol: f.dynamic_symbol,
                implicit_source: f.implicit_source,
                implicit_target: f.implicit_target,
            })
            .collect();

        let mut direct_edges = Vec::new();
        for (src, targets) in &callgraph.direct_edges {
            let from = parse_function_ref(src, &executable)?;
            for dst in targets {
                direct_edges.push((from.clone(), parse_function_ref(dst, &executable)?));
            }
        }

        let indirect_sources = callgraph
            .indirect_sources
            .iter()
            .map(|id| parse_function_ref(id, &executable))
            .collect::<FactsResult<Vec<_>>>()?;
        let indirect_targets = callgraph
            .indirect_targets
            .iter()
            .map(|id| parse_function_ref(id, &executable))
            .collect::<FactsResult<Vec<_>>>()?;

        Ok(Self {
            executable,
            package,
            scope,
            functions,
            direct_edges,
            indirect_sources,
            indirect_targets,
        })
    }

    /// Read facts from a file. A missing package defaults to the name of the
    /// directory holding the file.
    pub fn from_path(path: &Path) -> FactsResult<Self> {
        let text = read_to_string(path)?;
        let parent = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str());
        Self::parse(&text, parent)
    }
}
