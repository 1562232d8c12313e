//! Tagged topic matching.
//!
//! Subscription patterns are parsed once into an explicit variant instead of
//! doing ad-hoc string suffix checks at delivery time; topic names contain
//! colons and naive `ends_with`/`starts_with` logic gets them wrong.

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    /// Exact topic string.
    Exact(String),
    /// String-prefix match (from a trailing-`*` pattern).
    Prefix(String),
    /// Every event.
    All,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            TopicPattern::All
        } else if let Some(head) = pattern.strip_suffix('*') {
            TopicPattern::Prefix(head.to_string())
        } else {
            TopicPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(exact) => topic == exact,
            TopicPattern::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            TopicPattern::All => true,
        }
    }
}
