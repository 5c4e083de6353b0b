//! Vulnerability records mapping CVEs onto functions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::facts::{read_to_string, FactsError, FactsResult};
use crate::keys;

/// One (package, library, function) location a CVE was attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CveAffect {
    pub package: String,
    pub library: String,
    /// Either a complete function key (contains `@`) or a bare symbol name
    /// that is composed into a key with `library` and `package`.
    pub function: String,
}

impl CveAffect {
    /// Key of the affected function vertex.
    pub fn function_key(&self) -> String {
        if self.function.contains('@') {
            self.function.clone()
        } else {
            keys::function_key(&self.function, &self.library, &self.package)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CveRecord {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub affects: Vec<CveAffect>,
}

impl CveRecord {
    /// Publication year encoded in a `CVE-YYYY-NNNN` identifier.
    pub fn year(&self) -> Option<u32> {
        cve_year(&self.id)
    }
}

/// Year component of a CVE identifier, if it has one.
pub fn cve_year(id: &str) -> Option<u32> {
    let mut parts = id.split('-');
    match (parts.next(), parts.next()) {
        (Some(prefix), Some(year)) if prefix.eq_ignore_ascii_case("CVE") => year.parse().ok(),
        _ => None,
    }
}

/// Parse a JSON array of CVE records.
pub fn parse_cve_json(text: &str) -> FactsResult<Vec<CveRecord>> {
    Ok(serde_json::from_str(text)?)
}

/// Parse `cve,package,library,function_key,status` tuples, one per line,
/// grouping them by CVE in order of first appearance.
pub fn parse_cve_tuples(text: &str) -> FactsResult<Vec<CveRecord>> {
    let mut records: Vec<CveRecord> = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 || fields[..4].iter().any(|f| f.is_empty()) {
            return Err(FactsError::MalformedLine { line: idx + 1, content: line.to_string() });
        }
        let affect = CveAffect {
            package: fields[1].to_string(),
            library: fields[2].to_string(),
            function: fields[3].to_string(),
        };
        let status = if fields[4].is_empty() { None } else { Some(fields[4].to_string()) };
        match records.iter_mut().find(|r| r.id == fields[0]) {
            Some(record) => record.affects.push(affect),
            None => records.push(CveRecord {
                id: fields[0].to_string(),
                status,
                affects: vec![affect],
            }),
        }
    }
    Ok(records)
}

/// Load CVE records from a `.json` file or a tuple file (any other extension).
pub fn load_cve_records(path: &Path) -> FactsResult<Vec<CveRecord>> {
    let text = read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        parse_cve_json(&text)
    } else {
        parse_cve_tuples(&text)
    }
}
