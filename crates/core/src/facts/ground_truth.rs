//! Argument-type ground truth emitted by the LLVM instrumentation pass.
//!
//! Each `Function:` line names a function and its parameter types; the
//! `Ind-call:` lines that follow list the argument types of each indirect
//! call site in that function.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::facts::{read_to_string, FactsError, FactsResult};

const FUNCTION_TAG: &str = "Function:";
const INDIRECT_CALL_TAG: &str = "Ind-call:";

/// Argument information for one function.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionArgs {
    pub arg_types: Vec<String>,
    pub call_sites: Vec<Vec<String>>,
}

/// Ground truth for one library, keyed by symbol stem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundTruth {
    pub functions: BTreeMap<String, FunctionArgs>,
}

// Numeric tokens are array extents and tokens with '/' are source paths.
fn type_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    tokens
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()) && !t.contains('/'))
        .map(str::to_string)
        .collect()
}

/// Parse a ground-truth listing. Lines with any other tag are rejected.
pub fn parse_ground_truth(text: &str) -> FactsResult<GroundTruth> {
    let mut truth = GroundTruth::default();
    let mut current: Option<String> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let tag = tokens.next().unwrap_or_default();
        match tag {
            FUNCTION_TAG => {
                let name = tokens.next().ok_or_else(|| FactsError::MalformedLine {
                    line: line_no,
                    content: line.to_string(),
                })?;
                let stem = name.split('.').next().unwrap_or(name).to_string();
                truth.functions.insert(
                    stem.clone(),
                    FunctionArgs { arg_types: type_tokens(tokens), call_sites: Vec::new() },
                );
                current = Some(stem);
            }
            INDIRECT_CALL_TAG => {
                let function = current
                    .as_ref()
                    .and_then(|name| truth.functions.get_mut(name))
                    .ok_or_else(|| FactsError::Unscoped {
                        line: line_no,
                        tag: INDIRECT_CALL_TAG.to_string(),
                    })?;
                function.call_sites.push(type_tokens(tokens));
            }
            other => {
                return Err(FactsError::UnknownTag { line: line_no, tag: other.to_string() })
            }
        }
    }

    Ok(truth)
}

pub fn load_ground_truth(path: &Path) -> FactsResult<GroundTruth> {
    parse_ground_truth(&read_to_string(path)?)
}
