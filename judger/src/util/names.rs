use std::borrow::Cow;

use names::{Generator, Name};
use once_cell::sync::Lazy;
use regex::Regex;

static REPLACER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9-._]").unwrap());

/// Transform a random string as a valid docker label value (only containing
/// alpha/num, dots, underscores & dashes).
///
/// This function replaces invalid characters into double underlines `__`.
pub(crate) fn transform_string_as_docker_tag(s: &str) -> Cow<str> {
    REPLACER.replace_all(s, "__")
}

/// A human-readable, probably-unique tag starting with `prefix`, e.g.
/// `second-highest-salary-sneaky-pig-42`.
pub fn random_tag(prefix: &str) -> String {
    let name = Generator::with_naming(Name::Numbered)
        .next()
        .unwrap_or_else(|| "sandbox".into());
    format!("{}-{}", transform_string_as_docker_tag(prefix), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_tag() {
        assert_eq!(transform_string_as_docker_tag("abc-1.2_x"), "abc-1.2_x");
        assert_eq!(transform_string_as_docker_tag("a b/c"), "a__b__c");
    }

    #[test]
    fn test_random_tag_prefix() {
        let tag = random_tag("top salary");
        assert!(tag.starts_with("top__salary-"), "{}", tag);
        assert!(!tag.contains(' '));
    }
}
