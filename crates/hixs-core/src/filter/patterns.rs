//! Built-in blocklist

const BUILTIN: &str = include_str!("blocklist.txt");

/// Patterns shipped with the browser, in file order
pub fn builtin_patterns() -> impl Iterator<Item = &'static str> {
    parse_pattern_list(BUILTIN)
}

/// Split a pattern list into entries, skipping blank lines and `#` comments
pub fn parse_pattern_list(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
