//! Key comparison helpers shared by insertion, lookup and scan.

/// Longest common prefix of `a` and `b`, cut on a character boundary.
pub fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()));
    &a[..end]
}

/// Whether the subtree rooted at `key` can hold keys the listing wants: one of
/// them is a prefix of the other.
pub fn overlaps_prefix(key: &str, prefix: &str) -> bool {
    prefix.starts_with(key) || key.starts_with(prefix)
}

/// Whether the subtree rooted at `key` may contain keys greater than `after`.
///
/// Every key below `key` has it as a prefix, so the subtree is entirely `<= after`
/// unless `key > after` or `after` itself lies inside the subtree.
pub fn may_follow(key: &str, after: &str) -> bool {
    key > after || after.starts_with(key)
}

/// The common-prefix group `key` collapses into: `prefix`, then everything up to
/// and including the first `delimiter` after it. `None` when `key` does not start
/// with `prefix`, the delimiter is empty, or no delimiter follows the prefix.
pub fn delimited_group(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = key.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{}{}{}", prefix, &rest[..pos], delimiter))
}
