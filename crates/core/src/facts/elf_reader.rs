//! Read dynamic-link facts straight from ELF files.

use std::path::Path;

use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64, ET_DYN};
use goblin::elf::Elf;

use crate::db::models::LibraryKind;
use crate::facts::{DynLinkFacts, FactsError, FactsResult};

/// Machine names in the spelling `readelf -h` reports, spaces replaced by `_`.
fn machine_name(e_machine: u16) -> String {
    match e_machine {
        EM_X86_64 => "Advanced_Micro_Devices_X86-64".to_string(),
        EM_386 => "Intel_80386".to_string(),
        EM_AARCH64 => "AArch64".to_string(),
        EM_ARM => "ARM".to_string(),
        other => format!("EM_{other}"),
    }
}

/// Extract dynamic-link facts from ELF bytes.
///
/// `file_name` is used as the SONAME when the dynamic section declares none.
/// A position-independent executable is `ET_DYN` too; it is told apart from
/// a shared object by its program interpreter.
pub fn dyn_link_facts_from_bytes(
    bytes: &[u8],
    file_name: &str,
    package: &str,
) -> FactsResult<DynLinkFacts> {
    let elf = Elf::parse(bytes)?;
    let kind = if elf.header.e_type == ET_DYN && elf.interpreter.is_none() {
        LibraryKind::Shared
    } else {
        LibraryKind::Executable
    };
    let soname = elf.soname.map(str::to_string).unwrap_or_else(|| file_name.to_string());
    Ok(DynLinkFacts {
        package: package.to_string(),
        elf_class: Some(if elf.is_64 { "ELF64" } else { "ELF32" }.to_string()),
        machine: Some(machine_name(elf.header.e_machine)),
        kind,
        soname,
        needed: elf.libraries.iter().map(|lib| lib.to_string()).collect(),
    })
}

/// Extract facts from an ELF file. The owning package is the parent directory
/// name unless given explicitly.
pub fn read_dyn_link_facts(path: &Path, package: Option<&str>) -> FactsResult<DynLinkFacts> {
    let bytes = std::fs::read(path)
        .map_err(|source| FactsError::Io { path: path.to_path_buf(), source })?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let package = match package {
        Some(p) => p.to_string(),
        None => path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FactsError::MissingPackage(file_name.to_string()))?,
    };
    dyn_link_facts_from_bytes(&bytes, file_name, &package)
}

/// True when the file starts with the ELF magic.
pub fn looks_like_elf(path: &Path) -> bool {
    use std::io::Read;

    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"\x7fELF")
        .unwrap_or(false)
}
