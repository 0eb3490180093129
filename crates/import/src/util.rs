const BOM: char = '\u{feff}';

/// Case- and padding-insensitive key used for header and marker comparison.
/// Non-ASCII scripts (Hebrew, Portuguese accents) are compared as-is apart from
/// lowercasing.
pub fn fold_key(s: &str) -> String {
    s.trim_start_matches(BOM).trim().to_lowercase()
}

/// Drop a UTF-8 byte order mark, if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(data)
}
