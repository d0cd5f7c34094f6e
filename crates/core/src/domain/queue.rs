// Queue Domain Model

use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueName = String;

/// Set of queues a worker subscribes to
///
/// Patterns: `*` matches every queue, `name*` matches by prefix,
/// anything else matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct QueueSelector {
    patterns: Vec<String>,
}

/// One resolved pattern, used by store adapters to build filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePattern<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

impl QueueSelector {
    pub fn all() -> Self {
        Self {
            patterns: vec!["*".to_string()],
        }
    }

    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if patterns.is_empty() {
            Self::all()
        } else {
            Self { patterns }
        }
    }

    pub fn matches_all(&self) -> bool {
        self.patterns.iter().any(|p| p == "*")
    }

    pub fn matches(&self, queue_name: &str) -> bool {
        self.matches_all()
            || self.resolved().any(|pattern| match pattern {
                QueuePattern::Exact(name) => name == queue_name,
                QueuePattern::Prefix(prefix) => queue_name.starts_with(prefix),
            })
    }

    /// Patterns other than `*`
    pub fn resolved(&self) -> impl Iterator<Item = QueuePattern<'_>> {
        self.patterns
            .iter()
            .filter(|p| p.as_str() != "*")
            .map(|p| match p.strip_suffix('*') {
                Some(prefix) => QueuePattern::Prefix(prefix),
                None => QueuePattern::Exact(p.as_str()),
            })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for QueueSelector {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Vec<String>> for QueueSelector {
    fn from(patterns: Vec<String>) -> Self {
        Self::new(patterns)
    }
}

impl From<QueueSelector> for Vec<String> {
    fn from(selector: QueueSelector) -> Self {
        selector.patterns
    }
}

impl std::fmt::Display for QueueSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.patterns.join(","))
    }
}
