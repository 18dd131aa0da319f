//! Include/exclude filters over tool names.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One name pattern.
///
/// Serialized as a single-key object, e.g. `{"startsWith": "drive_"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterPattern {
    /// Exact match
    Literal(String),
    /// Name begins with the string
    StartsWith(String),
    /// Name ends with the string
    EndsWith(String),
    /// `*` matches any run of characters; the whole name must match
    Glob(String),
}

impl FilterPattern {
    /// Whether `name` matches this pattern.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(literal) => name == literal,
            Self::StartsWith(prefix) => name.starts_with(prefix.as_str()),
            Self::EndsWith(suffix) => name.ends_with(suffix.as_str()),
            Self::Glob(glob) => glob_regex(glob)
                .map(|re| re.is_match(name))
                .unwrap_or(false),
        }
    }
}

fn glob_regex(glob: &str) -> Option<Regex> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{body}$")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(glob, "invalid glob pattern: {}", e);
            None
        }
    }
}

/// Allow-list and deny-list applied to derived tools.
///
/// An empty `include` allows everything; `exclude` is applied after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilter {
    /// Tools must match at least one of these, when non-empty
    #[serde(default)]
    pub include: Vec<FilterPattern>,

    /// Tools matching any of these are dropped
    #[serde(default)]
    pub exclude: Vec<FilterPattern>,
}

impl ToolFilter {
    /// Whether a tool named `name` survives the filter.
    pub fn allows(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(name));
        included && !self.exclude.iter().any(|p| p.matches(name))
    }
}
