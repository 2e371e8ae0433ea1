/// Canonical form of a proximity token.
///
/// Readers emit the same tag with stray whitespace, separators and mixed
/// case depending on firmware, so matching happens on: trimmed, uppercased,
/// ASCII alphanumerics only. Returns an empty string when nothing survives.
pub fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
