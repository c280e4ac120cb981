//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::backlog::Backlog;

/// Check backlog invariants the schema cannot express:
/// - ids are non-blank
/// - ids are unique
pub fn validate_invariants(backlog: &Backlog) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, item) in backlog.items().iter().enumerate() {
        if item.id.trim().is_empty() {
            errors.push(format!("item {index}: id must not be blank"));
            continue;
        }
        if !seen.insert(item.id.as_str()) {
            errors.push(format!("item {index}: duplicate id '{}'", item.id));
        }
    }
    errors
}
