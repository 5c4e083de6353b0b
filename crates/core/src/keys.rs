//! Vertex and edge key composition.
//!
//! Every key that reaches the graph store goes through this module so that
//! package and library names are escaped the same way everywhere. A key
//! built with one escaping and looked up with another never matches.

use sha2::{Digest, Sha256};

/// Longest key the store accepts verbatim.
pub const MAX_KEY_LEN: usize = 254;

/// Pseudo-package attached to libraries whose owner could not be resolved.
pub const UNRESOLVED_PACKAGE: &str = "unresolved";

/// Selector used for the single per-library bridge in coarse mode.
pub const COARSE_SELECTOR: &str = "indirect";

/// Suffix shared by every bridge key.
pub const BRIDGE_SUFFIX: &str = "-bridge";

/// Substitution table applied by [`sanitize`]. `%` itself is not escaped, so
/// [`unsanitize`] is only exact for names that never contained these sequences.
const ESCAPES: &[(char, &str)] =
    &[('~', "%7E"), ('+', "%2B"), ('/', "%2F"), ('[', "%5B"), (']', "%5D")];

/// Escape characters the store forbids in keys.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ESCAPES.iter().find(|(c, _)| *c == ch) {
            Some((_, escaped)) => out.push_str(escaped),
            None => out.push(ch),
        }
    }
    out
}

/// Reverse [`sanitize`].
pub fn unsanitize(key: &str) -> String {
    let mut out = key.to_string();
    for (ch, escaped) in ESCAPES {
        out = out.replace(escaped, &ch.to_string());
    }
    out
}

fn is_key_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "_-:.@()+,=;$!*'%".contains(ch)
}

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compose a key from a leading name and its owner qualifier.
///
/// If the natural key is too long or contains characters outside the safe
/// set, the name part is replaced by the SHA-256 of the full natural key.
/// The qualifier is kept so hashed keys still group by owner.
pub fn vertex_key(name: &str, qualifier: &str) -> String {
    let natural = format!("{name}@{qualifier}");
    if natural.len() <= MAX_KEY_LEN && natural.chars().all(is_key_safe) {
        natural
    } else {
        format!("{}@{qualifier}", sha256_hex(&natural))
    }
}

/// Key of a package vertex.
pub fn package_key(package: &str) -> String {
    sanitize(package)
}

/// Key of a library vertex: `soname@package`.
pub fn library_key(soname: &str, package: &str) -> String {
    format!("{}@{}", sanitize(soname), sanitize(package))
}

/// Key of a function vertex: `symbol@soname@package`, hashed when needed.
pub fn function_key(symbol: &str, soname: &str, package: &str) -> String {
    vertex_key(symbol, &library_key(soname, package))
}

/// Key of a bridge vertex: `{selector}@{library_key}-bridge`.
pub fn bridge_key(selector: &str, library_key: &str) -> String {
    format!("{selector}@{library_key}{BRIDGE_SUFFIX}")
}

/// Selector for a precise-mode bridge built from an argument signature.
pub fn signature_selector(signature: &str) -> String {
    format!("args_{signature}")
}

/// True when `key` names a bridge vertex.
pub fn is_bridge_key(key: &str) -> bool {
    key.ends_with(BRIDGE_SUFFIX)
}

/// Key of an edge between two vertices.
pub fn edge_key(from: &str, to: &str) -> String {
    sha256_hex(&format!("{from}_{to}"))
}

/// Key of a CVE-affects edge.
pub fn cve_edge_key(cve: &str, function_key: &str) -> String {
    edge_key(cve, function_key)
}

/// Strip the owner qualifier and any version/clone suffix from a function key,
/// leaving the bare symbol stem (`foo.cold@libx.so@pkg` becomes `foo`).
pub fn symbol_stem(key: &str) -> &str {
    let head = key.split('@').next().unwrap_or(key);
    head.split('.').next().unwrap_or(head)
}
