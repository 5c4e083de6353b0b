//! Dynamic-link facts in the tagged `TAG,value` line format.
//!
//! ```text
//! DEB_NAME,libfoo1
//! ARCH,ELF64
//! MACH,Advanced_Micro_Devices_X86-64
//! TYPE,SHARED
//! SONAME,libfoo.so.1
//! NEEDED,libc.so.6
//! ```
//!
//! A `DEB_NAME` line opens a new record, so several binaries may share a file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::models::LibraryKind;
use crate::facts::{read_to_string, FactsError, FactsResult};

/// The tags a dynamic-link fact line may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfInfoTag {
    DebName,
    Arch,
    Mach,
    Type,
    Soname,
    Needed,
}

impl ElfInfoTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ElfInfoTag::DebName => "DEB_NAME",
            ElfInfoTag::Arch => "ARCH",
            ElfInfoTag::Mach => "MACH",
            ElfInfoTag::Type => "TYPE",
            ElfInfoTag::Soname => "SONAME",
            ElfInfoTag::Needed => "NEEDED",
        }
    }
}

impl FromStr for ElfInfoTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEB_NAME" => Ok(ElfInfoTag::DebName),
            "ARCH" => Ok(ElfInfoTag::Arch),
            "MACH" => Ok(ElfInfoTag::Mach),
            "TYPE" => Ok(ElfInfoTag::Type),
            "SONAME" => Ok(ElfInfoTag::Soname),
            "NEEDED" => Ok(ElfInfoTag::Needed),
            _ => Err(()),
        }
    }
}

/// What the dynamic section of one shipped binary declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DynLinkFacts {
    pub package: String,
    /// ELF class, e.g. `ELF64`.
    pub elf_class: Option<String>,
    /// Machine in readelf spelling, e.g. `Advanced_Micro_Devices_X86-64`.
    pub machine: Option<String>,
    pub kind: LibraryKind,
    pub soname: String,
    pub needed: Vec<String>,
}

impl DynLinkFacts {
    pub fn new(package: impl Into<String>, soname: impl Into<String>, kind: LibraryKind) -> Self {
        Self {
            package: package.into(),
            elf_class: None,
            machine: None,
            kind,
            soname: soname.into(),
            needed: Vec::new(),
        }
    }

    /// Builder-style helper to attach needed libraries.
    pub fn with_needed<I, S>(mut self, needed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needed = needed.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for DynLinkFacts {
    /// Render in the tagged line format accepted by [`parse_elf_info`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LibraryKind::Shared => "SHARED",
            LibraryKind::Executable => "EXEC",
        };
        writeln!(f, "{},{}", ElfInfoTag::DebName.as_str(), self.package)?;
        writeln!(f, "{},{}", ElfInfoTag::Arch.as_str(), self.elf_class.as_deref().unwrap_or(""))?;
        writeln!(f, "{},{}", ElfInfoTag::Mach.as_str(), self.machine.as_deref().unwrap_or(""))?;
        writeln!(f, "{},{}", ElfInfoTag::Type.as_str(), kind)?;
        writeln!(f, "{},{}", ElfInfoTag::Soname.as_str(), self.soname)?;
        for needed in &self.needed {
            writeln!(f, "{},{}", ElfInfoTag::Needed.as_str(), needed)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct PartialRecord {
    start_line: usize,
    package: String,
    elf_class: Option<String>,
    machine: Option<String>,
    kind: Option<LibraryKind>,
    soname: Option<String>,
    needed: Vec<String>,
}

impl PartialRecord {
    fn finish(self) -> FactsResult<DynLinkFacts> {
        let soname = self.soname.filter(|s| !s.is_empty()).ok_or_else(|| {
            FactsError::MalformedLine {
                line: self.start_line,
                content: format!("record for {} has no SONAME", self.package),
            }
        })?;
        Ok(DynLinkFacts {
            package: self.package,
            elf_class: self.elf_class,
            machine: self.machine,
            kind: self.kind.unwrap_or(LibraryKind::Shared),
            soname,
            needed: self.needed,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse tagged dynamic-link facts. Unknown tags and untagged lines are errors.
pub fn parse_elf_info(text: &str) -> FactsResult<Vec<DynLinkFacts>> {
    let mut records = Vec::new();
    let mut current: Option<PartialRecord> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (tag, value) = line.split_once(',').ok_or_else(|| FactsError::MalformedLine {
            line: line_no,
            content: line.to_string(),
        })?;
        let tag = ElfInfoTag::from_str(tag)
            .map_err(|_| FactsError::UnknownTag { line: line_no, tag: tag.to_string() })?;
        let value = value.trim();

        if tag == ElfInfoTag::DebName {
            if let Some(done) = current.take() {
                records.push(done.finish()?);
            }
            current = Some(PartialRecord {
                start_line: line_no,
                package: value.to_string(),
                ..PartialRecord::default()
            });
            continue;
        }

        let record = current.as_mut().ok_or_else(|| FactsError::Unscoped {
            line: line_no,
            tag: tag.as_str().to_string(),
        })?;
        match tag {
            ElfInfoTag::Arch => record.elf_class = non_empty(value),
            ElfInfoTag::Mach => record.machine = non_empty(value),
            ElfInfoTag::Type => record.kind = Some(LibraryKind::from_str_lossy(value)),
            ElfInfoTag::Soname => record.soname = non_empty(value),
            ElfInfoTag::Needed => {
                if !value.is_empty() {
                    record.needed.push(value.to_string());
                }
            }
            ElfInfoTag::DebName => {}
        }
    }

    if let Some(done) = current.take() {
        records.push(done.finish()?);
    }
    Ok(records)
}

/// Read and parse a dynamic-link facts file.
pub fn load_elf_info(path: &Path) -> FactsResult<Vec<DynLinkFacts>> {
    parse_elf_info(&read_to_string(path)?)
}
