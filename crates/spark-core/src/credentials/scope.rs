/// Canonical form of a space-separated scope string: tokens sorted
/// alphabetically, joined by single spaces. Used as the token cache key.
pub fn sort_scope(scope: &str) -> String {
    let mut tokens: Vec<&str> = scope.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Removes every occurrence of `reserved` from `scope`, preserving the order
/// of the remaining tokens.
pub fn filter_scope(reserved: &str, scope: &str) -> String {
    scope
        .split_whitespace()
        .filter(|token| *token != reserved)
        .collect::<Vec<_>>()
        .join(" ")
}
