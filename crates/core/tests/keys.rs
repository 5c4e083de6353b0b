use vulnreach_core::keys::{
    bridge_key, cve_edge_key, edge_key, function_key, is_bridge_key, library_key, package_key,
    sanitize, sha256_hex, signature_selector, symbol_stem, unsanitize, COARSE_SELECTOR,
    MAX_KEY_LEN,
};

#[test]
fn sanitize_escapes_store_forbidden_characters() {
    assert_eq!(sanitize("libstdc++6"), "libstdc%2B%2B6");
    assert_eq!(sanitize("a/b~c[d]"), "a%2Fb%7Ec%5Bd%5D");
    assert_eq!(sanitize("plain-name_1.0"), "plain-name_1.0");
}

#[test]
fn unsanitize_reverses_sanitize() {
    for name in ["libstdc++6", "gcc-12-base~rc1", "x/y", "[weird]"] {
        assert_eq!(unsanitize(&sanitize(name)), name);
    }
}

#[test]
fn natural_function_key_is_symbol_library_package() {
    assert_eq!(function_key("malloc", "libc.so.6", "libc6"), "malloc@libc.so.6@libc6");
    assert_eq!(library_key("libstdc++.so.6", "libstdc++6"), "libstdc%2B%2B.so.6@libstdc%2B%2B6");
    assert_eq!(package_key("libstdc++6"), "libstdc%2B%2B6");
}

#[test]
fn overlong_function_key_is_hashed_but_keeps_owner() {
    let symbol = "f".repeat(MAX_KEY_LEN);
    let key = function_key(&symbol, "libx.so", "pkg");
    let natural = format!("{symbol}@libx.so@pkg");

    assert!(key.len() <= MAX_KEY_LEN);
    assert_eq!(key, format!("{}@libx.so@pkg", sha256_hex(&natural)));
}

#[test]
fn unsafe_symbol_characters_force_hashing() {
    // Demangled C++ names carry spaces and angle brackets.
    let key = function_key("std::vector<int>::push_back", "libfoo.so", "foo");
    assert!(key.ends_with("@libfoo.so@foo"));
    assert_eq!(key.split('@').next().map(str::len), Some(64));

    // Hashing is deterministic.
    assert_eq!(key, function_key("std::vector<int>::push_back", "libfoo.so", "foo"));
}

#[test]
fn bridge_keys_follow_selector_convention() {
    let lib = library_key("libx.so", "pkg");
    let coarse = bridge_key(COARSE_SELECTOR, &lib);
    let precise = bridge_key(&signature_selector("ip"), &lib);

    assert_eq!(coarse, "indirect@libx.so@pkg-bridge");
    assert_eq!(precise, "args_ip@libx.so@pkg-bridge");
    assert!(is_bridge_key(&coarse));
    assert!(!is_bridge_key(&lib));
}

#[test]
fn edge_keys_are_directional_hashes() {
    assert_eq!(edge_key("a", "b"), sha256_hex("a_b"));
    assert_ne!(edge_key("a", "b"), edge_key("b", "a"));
    assert_eq!(cve_edge_key("CVE-2024-0001", "f@l@p"), sha256_hex("CVE-2024-0001_f@l@p"));
}

#[test]
fn symbol_stem_drops_owner_and_suffixes() {
    assert_eq!(symbol_stem("foo.cold@libx.so@pkg"), "foo");
    assert_eq!(symbol_stem("bar.part.0"), "bar");
    assert_eq!(symbol_stem("baz"), "baz");
}
