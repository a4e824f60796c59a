//! Expected-name to object-name matching.
//!
//! Most expectations match a single object by exact name. Some upstream feeds deliver a
//! logical file as several physically named parts; those are registered as families and
//! match any object that shares a short leading prefix with the expected name.

use serde::Deserialize;

const DEFAULT_FAMILY_MATCH_LEN: usize = 5;

/// A family of multi-part deliveries, recognised by the prefix of the expected name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FamilyRule {
    pub prefix: String,
    /// Number of leading characters of the expected name a candidate must share.
    #[serde(default = "default_match_len")]
    pub match_len: usize,
}

fn default_match_len() -> usize {
    DEFAULT_FAMILY_MATCH_LEN
}

impl FamilyRule {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            match_len: DEFAULT_FAMILY_MATCH_LEN,
        }
    }
}

/// How a particular expected name is compared against candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

impl MatchKey<'_> {
    pub fn accepts(&self, candidate: &str) -> bool {
        match self {
            MatchKey::Exact(name) => candidate == *name,
            MatchKey::Prefix(prefix) => candidate.starts_with(prefix),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    families: Vec<FamilyRule>,
}

impl NameMatcher {
    pub fn new(families: Vec<FamilyRule>) -> Self {
        Self { families }
    }

    pub fn family_for(&self, expected: &str) -> Option<&FamilyRule> {
        self.families
            .iter()
            .find(|rule| expected.starts_with(rule.prefix.as_str()))
    }

    pub fn key<'a>(&self, expected: &'a str) -> MatchKey<'a> {
        match self.family_for(expected) {
            Some(rule) => MatchKey::Prefix(leading_chars(expected, rule.match_len)),
            None => MatchKey::Exact(expected),
        }
    }
}

/// Returns the first `count` characters of `value` without splitting a UTF-8 sequence.
fn leading_chars(value: &str, count: usize) -> &str {
    match value.char_indices().nth(count) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
