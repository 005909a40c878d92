use unicode_normalization::UnicodeNormalization;

/// Normalizes an entity name for storage: unicode NFKC plus whitespace trim.
/// Case and punctuation are preserved since names end up in folder patterns.
pub fn clean_name(name: &str) -> String {
    name
        .trim()
        .nfkc()
        .collect::<String>()
}

/// Makes a string safe to use as a single path component: path separators
/// and control characters are dropped, leading/trailing whitespace and dots
/// stripped.
pub fn sanitize_component(component: &str) -> String {
    let cleaned: String = component
        .nfkc()
        .collect::<String>()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':') && !c.is_control())
        .collect();

    cleaned
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name_trims() {
        assert_eq!(clean_name("  Dan Simmons "), "Dan Simmons");
    }

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize_component("Foo/Bar\\Baz:Qux"), "FooBarBazQux");
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_component("Hyper\x00ion\x07"), "Hyperion");
    }

    #[test]
    fn test_sanitize_strips_edge_dots_and_spaces() {
        assert_eq!(sanitize_component("  .Hidden Book. "), "Hidden Book");
    }

    #[test]
    fn test_sanitize_keeps_interior_punctuation() {
        assert_eq!(sanitize_component("Book 1.5 - The Return"), "Book 1.5 - The Return");
    }
}
