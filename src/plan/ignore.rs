//! Ignore-op filtering of Creates: before computing updates, objects
//! matching a `comparePatches` entry with any operation of
//! `op = "ignore"` are removed from the Create set.

use regex::Regex;

use crate::crd::{ComparePatch, PatchOp};
use crate::objectset::ObjectKey;

/// Whether `key` is covered by an ignore-op rule and should therefore
/// be excluded from the Create set.
pub fn is_ignored(rules: &[ComparePatch], key: &ObjectKey) -> bool {
    rules.iter().any(|rule| {
        rule.kind == key.kind
            && rule.operations.iter().any(|op| matches!(op.op, PatchOp::Ignore))
            && namespace_matches(rule, key)
            && name_matches(&rule.name, &key.name)
    })
}

fn namespace_matches(rule: &ComparePatch, key: &ObjectKey) -> bool {
    rule.namespace.is_empty() || key.namespace.as_deref() == Some(rule.namespace.as_str())
}

/// A `name` with no regex metacharacters
/// matches by exact equality; only a name containing at least one
/// metacharacter is compiled and matched as a `regex::Regex`. An empty
/// `name` matches any object in the (optionally namespace-scoped) rule.
///
/// This keeps the common case (a plain literal name) immune to
/// accidental partial-match surprises from unescaped regex syntax,
/// while preserving the documented regex behavior for patterns such as
/// `.*-test`.
pub fn name_matches(pattern: &str, candidate: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if !has_regex_metacharacters(pattern) {
        return pattern == candidate;
    }
    match Regex::new(pattern) {
        Ok(re) => re.is_match(candidate),
        Err(_) => pattern == candidate,
    }
}

fn has_regex_metacharacters(pattern: &str) -> bool {
    pattern.chars().any(|c| "^$.*+?()[]{}|\\".contains(c))
}
