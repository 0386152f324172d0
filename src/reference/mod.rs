pub(crate) mod capacity;
pub(crate) mod geo_index;

/// Normalize a country code to the canonical upper-case alpha-3 form.
pub(crate) fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() { None } else { Some(code) }
}

/// Pick the first alias present in `available`, in alias order.
pub(crate) fn resolve_alias<'a, S: AsRef<str>>(
    aliases: &'a [String],
    available: &[S],
) -> Option<&'a str> {
    aliases
        .iter()
        .find(|alias| available.iter().any(|col| col.as_ref() == alias.as_str()))
        .map(|alias| alias.as_str())
}
