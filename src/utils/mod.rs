//! Text helpers shared across the runtime.

use std::sync::OnceLock;

use regex::Regex;

fn snaked_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}_]+").expect("valid regex"))
}

fn word_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{M}\p{L}\p{N}_']+|\p{S}").expect("valid regex"))
}

/// Turns a human-readable name into a stable context reference: trimmed,
/// lower-cased, with runs of non letter/digit/underscore characters collapsed
/// to a single `_`.
pub fn snakify(text: &str) -> String {
    snaked_chars()
        .replace_all(text.trim(), "_")
        .to_lowercase()
}

/// Splits a string into word tokens. Sequences of letters, digits, underscores
/// and apostrophes are tokens; symbols (including emoji) are individual tokens.
pub fn tokenize(text: &str) -> Vec<&str> {
    word_tokens().find_iter(text).map(|m| m.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snakify() {
        assert_eq!(snakify("Favorite Color"), "favorite_color");
        assert_eq!(snakify("  hello   world  "), "hello_world");
        assert_eq!(snakify("Age?"), "age_");
        assert_eq!(snakify("2Factor Auth!!"), "2factor_auth_");
        assert_eq!(snakify("already_snaked"), "already_snaked");
        assert_eq!(snakify(""), "");
        assert_eq!(snakify("Ça va bien"), "ça_va_bien");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("I love RED!"), vec!["I", "love", "RED"]);
        assert_eq!(tokenize("one-two three"), vec!["one", "two", "three"]);
        assert_eq!(tokenize("don't stop"), vec!["don't", "stop"]);
        assert!(tokenize("").is_empty());
    }
}
