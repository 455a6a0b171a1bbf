//! Topic splitting and matching
//!
//! Two entry points share one level-walking algorithm:
//! - [`match_filter`] matches a concrete topic against a filter chosen by a
//!   client (subscriptions, retained message lookups).
//! - [`match_path`] matches a concrete topic against a pattern authored by the
//!   server (the read/write lists of an [`Access`](crate::auth::Access)).
//!
//! Matching rules:
//! - / is the level separator
//! - + matches exactly one level
//! - # matches zero or more trailing levels and is only valid as the last level
//! - every other level must match literally

mod validation;

pub use validation::validate_topic_filter;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Level separator
pub const SEPARATOR: &str = "/";
/// Single-level wildcard
pub const PART_WILDCARD: &str = "+";
/// Multi-level wildcard
pub const WILDCARD: &str = "#";
/// First-level prefix of internal topics
pub const INTERNAL_PREFIX: &str = "$";

/// Split a topic into its levels
///
/// An empty topic has no levels.
pub fn split(topic: &str) -> Vec<&str> {
    if topic.is_empty() {
        return Vec::new();
    }
    topic.split(SEPARATOR).collect()
}

/// Join levels back into a topic string
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    let mut topic = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            topic.push_str(SEPARATOR);
        }
        topic.push_str(part.as_ref());
    }
    topic
}

/// Check whether the first level marks an internal topic
pub fn is_internal<S: AsRef<str>>(parts: &[S]) -> bool {
    parts
        .first()
        .is_some_and(|first| first.as_ref().starts_with(INTERNAL_PREFIX))
}

/// Check if a client-chosen topic filter matches a topic name
pub fn match_filter(topic: &str, filter: &str) -> bool {
    match_levels(&split(topic), &split(filter))
}

/// Check if a server-authored access pattern matches an already split topic
pub fn match_path<T: AsRef<str>, P: AsRef<str>>(topic: &[T], pattern: &[P]) -> bool {
    match_levels(topic, pattern)
}

fn match_levels<T: AsRef<str>, P: AsRef<str>>(topic: &[T], pattern: &[P]) -> bool {
    for (i, level) in pattern.iter().enumerate() {
        match level.as_ref() {
            WILDCARD => return i == pattern.len() - 1,
            PART_WILDCARD => {
                if i >= topic.len() {
                    return false;
                }
            }
            literal => {
                if topic.get(i).map(|t| t.as_ref()) != Some(literal) {
                    return false;
                }
            }
        }
    }

    topic.len() == pattern.len()
}

/// A server-authored topic pattern, stored pre-split
///
/// Serialized as its joined string form (`"+/devices/+/up"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern(Vec<String>);

impl TopicPattern {
    /// Build a pattern from levels without validation
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Levels of the pattern
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Check if the pattern matches an already split topic
    pub fn matches<S: AsRef<str>>(&self, topic: &[S]) -> bool {
        match_path(topic, &self.0)
    }
}

impl FromStr for TopicPattern {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_topic_filter(s)?;
        Ok(Self::from_parts(split(s)))
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = &'static str;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> String {
        pattern.to_string()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.0))
    }
}
