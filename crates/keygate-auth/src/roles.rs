//! Role normalization and RBAC checks.
//!
//! Identity providers hand out roles in several shapes: bare strings
//! (`["Admin"]`), objects (`[{"name": "Admin", "id": 7}]`), or a single
//! string. [`RoleEntry`] captures those shapes as they arrive; [`RoleSet`] is
//! the canonical form every authorization decision runs against: trimmed,
//! lowercased, deduplicated names.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One role as delivered by the issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleEntry {
    /// `"admin"`
    Name(String),
    /// `{"name": "admin", ...}`; other fields are kept but ignored.
    Named {
        name: String,
        #[serde(flatten)]
        attributes: Map<String, Value>,
    },
    /// Anything else. Kept for round-tripping, never matched.
    Unrecognized(Value),
}

impl RoleEntry {
    /// The role name, if this entry has a recognizable one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) | Self::Named { name, .. } => Some(name),
            Self::Unrecognized(_) => None,
        }
    }

    /// Parse the entries of a raw `roles` claim.
    ///
    /// Accepts an array of entries or a single entry.
    pub fn from_claim(value: &Value) -> Vec<RoleEntry> {
        match value {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            Value::Null => Vec::new(),
            other => vec![Self::from_value(other)],
        }
    }

    fn from_value(value: &Value) -> RoleEntry {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::Unrecognized(value.clone()))
    }
}

impl From<&str> for RoleEntry {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Canonical set of lowercase role names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    /// Normalize raw entries: drop unrecognized shapes and blank names,
    /// lowercase the rest.
    pub fn normalize<'a>(entries: impl IntoIterator<Item = &'a RoleEntry>) -> Self {
        Self(
            entries
                .into_iter()
                .filter_map(RoleEntry::name)
                .filter_map(canonical)
                .collect(),
        )
    }

    /// Normalize a raw JSON `roles` claim.
    pub fn from_claim(value: &Value) -> Self {
        Self::normalize(&RoleEntry::from_claim(value))
    }

    pub fn has_role(&self, role: &str) -> bool {
        canonical(role).is_some_and(|role| self.0.contains(&role))
    }

    /// `true` if at least one of `roles` is held. Empty input yields `false`.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    /// `true` if every one of `roles` is held. Empty input yields `true`.
    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().all(|r| self.has_role(r.as_ref()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for RoleSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().filter_map(canonical).collect())
    }
}

fn canonical(name: &str) -> Option<String> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}
