//! Expected-value objects for text, URL, title and style assertions
//!
//! In YAML a matcher is written as a single-key map:
//!
//! ```yaml
//! matches: { exact: "rgb(16, 185, 129)" }
//! matches: { contains: "healthy" }
//! matches: { regex: "(?i)indexer|eligibility" }
//! matches: not_empty
//! ```
//!
//! Predicates can only be built from Rust.

use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Whole value equals the string (surrounding whitespace ignored)
    Exact(String),
    /// Value contains the substring
    Contains(String),
    /// Value matches the regular expression anywhere
    Regex(Pattern),
    /// Value has non-whitespace content
    NotEmpty,
    /// Value does not satisfy the inner matcher
    Not(Box<Matcher>),
    #[serde(skip)]
    Predicate(Predicate),
}

impl Matcher {
    pub fn exact(value: impl Into<String>) -> Self {
        Matcher::Exact(value.into())
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Matcher::Contains(value.into())
    }

    pub fn regex(pattern: &str) -> E2eResult<Self> {
        Ok(Matcher::Regex(Pattern::new(pattern)?))
    }

    pub fn predicate<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Predicate {
            name: name.into(),
            check: Arc::new(check),
        })
    }

    pub fn negate(self) -> Self {
        Matcher::Not(Box::new(self))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Exact(expected) => value.trim() == expected.trim(),
            Matcher::Contains(needle) => value.contains(needle.as_str()),
            Matcher::Regex(pattern) => pattern.0.is_match(value),
            Matcher::NotEmpty => !value.trim().is_empty(),
            Matcher::Not(inner) => !inner.matches(value),
            Matcher::Predicate(predicate) => (predicate.check)(value),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(expected) => write!(f, "'{}'", expected),
            Matcher::Contains(needle) => write!(f, "text containing '{}'", needle),
            Matcher::Regex(pattern) => write!(f, "/{}/", pattern.0.as_str()),
            Matcher::NotEmpty => write!(f, "non-empty text"),
            Matcher::Not(inner) => write!(f, "not {}", inner),
            Matcher::Predicate(predicate) => write!(f, "<{}>", predicate.name),
        }
    }
}

/// Compiled regular expression, deserialized from its source string
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> E2eResult<Self> {
        Regex::new(source)
            .map(Pattern)
            .map_err(|e| E2eError::SpecParse(format!("invalid regex /{}/: {}", source, e)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = String;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Regex::new(&source)
            .map(Pattern)
            .map_err(|e| format!("invalid regex /{}/: {}", source, e))
    }
}

/// Named check closure
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

/// Shorten long observed values for failure messages
pub fn excerpt(value: &str, max_chars: usize) -> String {
    let collapsed: String = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        let cut: String = collapsed.chars().take(max_chars).collect();
        format!("'{}...'", cut)
    } else {
        format!("'{}'", collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_ignores_surrounding_whitespace() {
        let m = Matcher::exact("rgb(16, 185, 129)");
        assert!(m.matches("rgb(16, 185, 129)"));
        assert!(m.matches("  rgb(16, 185, 129)\n"));
        assert!(!m.matches("rgb(16, 185, 130)"));
    }

    #[test]
    fn test_regex_is_unanchored() {
        let m = Matcher::regex(r"/goose/?$").unwrap();
        assert!(m.matches("http://localhost/goose/"));
        assert!(m.matches("http://localhost/goose"));
        assert!(!m.matches("http://localhost/goose/votes"));
    }

    #[test]
    fn test_case_insensitive_regex() {
        let m = Matcher::regex("(?i)indexer|eligibility|rewards|oracle").unwrap();
        assert!(m.matches("Rewards Eligibility Oracle"));
        assert!(!m.matches("Governance"));
    }

    #[test]
    fn test_not_empty_and_negation() {
        assert!(Matcher::NotEmpty.matches(" x "));
        assert!(!Matcher::NotEmpty.matches(" \n\t"));
        assert!(Matcher::contains("404").negate().matches("all good"));
    }

    #[test]
    fn test_predicate() {
        let m = Matcher::predicate("under 10 chars", |v| v.len() < 10);
        assert!(m.matches("short"));
        assert!(!m.matches("definitely too long"));
        assert_eq!(m.to_string(), "<under 10 chars>");
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let m: Matcher = serde_yaml::from_str("regex: '(?i)proposal|vote'").unwrap();
        assert!(m.matches("Open Proposals"));

        let m: Matcher = serde_yaml::from_str("not_empty").unwrap();
        assert!(matches!(m, Matcher::NotEmpty));

        let m: Matcher = serde_yaml::from_str("not: { contains: gradient }").unwrap();
        assert!(m.matches("rgb(0, 0, 0)"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let result: Result<Matcher, _> = serde_yaml::from_str("regex: '(unclosed'");
        assert!(result.is_err());
        assert!(Matcher::regex("(unclosed").is_err());
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("a\n  b", 10), "'a b'");
        assert_eq!(excerpt("abcdefghijkl", 4), "'abcd...'");
    }
}
