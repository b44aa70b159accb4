/// Longest query the index is ever asked to match.
const MAX_QUERY_CHARS: usize = 200;

/// Normalize a raw user query: trim, strip quote and backslash
/// characters, collapse internal whitespace, truncate to 200 characters.
/// An empty result means "nothing to search for".
pub fn sanitize_query(raw: &str) -> String {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\\'))
        .collect();

    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect()
}
