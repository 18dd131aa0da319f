//! Tool naming: slugs and collision suffixes.

use std::collections::HashMap;

/// Turn an identifier into a tool-name token.
///
/// Lowercases, maps `.` and `/` to `-`, and drops everything outside
/// `[A-Za-z0-9_-]`.
///
/// ```rust
/// use mcp_core::registry::slugify;
///
/// assert_eq!(slugify("Drive.Files/List"), "drive-files-list");
/// assert_eq!(slugify("send e-mail!"), "sende-mail");
/// ```
pub fn slugify(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c == '.' || c == '/' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Name assignments for the lifetime of one registry.
///
/// An internal id keeps the first name it was given. A different id whose
/// candidate is taken gets `-1`, `-2`, … appended.
#[derive(Debug, Default)]
pub(crate) struct NameCache {
    by_id: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl NameCache {
    pub(crate) fn assign(&mut self, internal_id: &str, candidate: &str) -> String {
        if let Some(name) = self.by_id.get(internal_id) {
            return name.clone();
        }

        let mut name = candidate.to_string();
        let mut suffix = 0usize;
        while self.by_name.contains_key(&name) {
            suffix += 1;
            name = format!("{candidate}-{suffix}");
        }

        if suffix > 0 {
            tracing::debug!(internal_id, candidate, assigned = %name, "tool name collision resolved");
        }
        self.by_id.insert(internal_id.to_string(), name.clone());
        self.by_name.insert(name.clone(), internal_id.to_string());
        name
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}
