//! Parsers for the external fact formats fed into the graph.
//!
//! Each parser is strict: input it does not understand is an error for the
//! enclosing unit, never silently skipped.

use std::path::PathBuf;

use thiserror::Error;

pub mod binary;
pub mod cve;
pub mod elf_info;
#[cfg(feature = "elf-reader")]
pub mod elf_reader;
pub mod ground_truth;
pub mod packages;

pub use binary::*;
pub use cve::*;
pub use elf_info::*;
#[cfg(feature = "elf-reader")]
pub use elf_reader::*;
pub use ground_truth::*;
pub use packages::*;

/// Error raised while reading or parsing a fact file.
#[derive(Debug, Error)]
pub enum FactsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The file contains no JSON object at all.
    #[error("No JSON payload found")]
    NoJsonPayload,

    /// Neither an explicit executable nor a usable analysis scope was given.
    #[error("Cannot determine the analysed executable from the analysis scope")]
    MissingExecutable,

    /// The binary's owning package is unknown.
    #[error("No package given for {0} and none can be inferred from its location")]
    MissingPackage(String),

    /// A function identifier is not of the form `library@function+offset`.
    #[error("Malformed function identifier '{0}'")]
    BadIdentifier(String),

    #[error("Line {line}: unknown tag '{tag}'")]
    UnknownTag { line: usize, tag: String },

    #[error("Line {line}: malformed entry '{content}'")]
    MalformedLine { line: usize, content: String },

    /// A fact record appeared before any header that scopes it.
    #[error("Line {line}: '{tag}' appears before its scoping record")]
    Unscoped { line: usize, tag: String },

    #[cfg(feature = "elf-reader")]
    #[error("Failed to parse ELF file: {0}")]
    Elf(#[from] goblin::error::Error),
}

/// Convenience result type for fact parsing.
pub type FactsResult<T> = Result<T, FactsError>;

pub(crate) fn read_to_string(path: &std::path::Path) -> FactsResult<String> {
    std::fs::read_to_string(path)
        .map_err(|source| FactsError::Io { path: path.to_path_buf(), source })
}
