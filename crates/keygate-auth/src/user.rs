//! The authenticated user profile.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::roles::{RoleEntry, RoleSet};

/// Immutable user profile, as returned by the userinfo endpoint and cached in
/// the credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable subject identifier (`sub`, or `id` for non-OIDC providers).
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleEntry>,
    /// Every other profile field, preserved as delivered.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            username: None,
            roles: Vec::new(),
            claims: Map::new(),
        }
    }

    /// Build a user from an identity provider profile document.
    ///
    /// The subject comes from `sub`, falling back to `id` (string or number).
    /// The username comes from `preferred_username`, falling back to
    /// `username`. Returns `None` when no subject can be found.
    pub fn from_profile(profile: Value) -> Option<Self> {
        let Value::Object(mut claims) = profile else {
            return None;
        };

        let id = [claims.remove("sub"), claims.remove("id")]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })?;

        let email = take_string(&mut claims, "email");
        let preferred = take_string(&mut claims, "preferred_username");
        let username = preferred.or(take_string(&mut claims, "username"));
        let roles = claims
            .remove("roles")
            .map(|raw| RoleEntry::from_claim(&raw))
            .unwrap_or_default();

        Some(Self {
            id,
            email,
            username,
            roles,
            claims,
        })
    }

    /// Canonical role set for authorization decisions.
    pub fn role_set(&self) -> RoleSet {
        RoleSet::normalize(&self.roles)
    }

    /// A copy of this user with the entries of a raw `roles` claim appended.
    /// Entries already present are not repeated.
    #[must_use]
    pub fn with_role_claim(&self, claim: &Value) -> Self {
        let mut next = self.clone();
        for entry in RoleEntry::from_claim(claim) {
            if !next.roles.contains(&entry) {
                next.roles.push(entry);
            }
        }
        next
    }
}

/// Remove `key` from the claims. Non-string values are dropped so the cached
/// profile never carries two different shapes under one field name.
fn take_string(claims: &mut Map<String, Value>, key: &str) -> Option<String> {
    match claims.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oidc_profile() {
        let user = User::from_profile(json!({
            "sub": "248289761001",
            "email": "jane@example.com",
            "preferred_username": "jane",
            "roles": ["Admin", { "name": "Billing" }],
            "locale": "en-GB"
        }))
        .unwrap();

        assert_eq!(user.id, "248289761001");
        assert_eq!(user.email.as_deref(), Some("jane@example.com"));
        assert_eq!(user.username.as_deref(), Some("jane"));
        assert!(user.role_set().has_all_roles(&["admin", "billing"]));
        assert_eq!(user.claims["locale"], "en-GB");
    }

    #[test]
    fn numeric_id_fallback() {
        let user = User::from_profile(json!({ "id": 42, "username": "octo" })).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.username.as_deref(), Some("octo"));
        assert!(user.roles.is_empty());
    }

    #[test]
    fn profile_without_subject_is_rejected() {
        assert!(User::from_profile(json!({ "email": "x@example.com" })).is_none());
        assert!(User::from_profile(json!({ "sub": "" })).is_none());
        assert!(User::from_profile(json!("not an object")).is_none());
    }

    #[test]
    fn non_string_email_is_dropped() {
        let user = User::from_profile(json!({ "sub": "u", "email": { "primary": "a@b" } })).unwrap();
        assert!(user.email.is_none());
        assert!(!user.claims.contains_key("email"));

        let cached = serde_json::to_string(&user).unwrap();
        assert_eq!(serde_json::from_str::<User>(&cached).unwrap(), user);
    }

    #[test]
    fn cache_round_trip() {
        let user = User::from_profile(json!({ "sub": "u-1", "roles": ["ops"], "team": "infra" })).unwrap();
        let cached = serde_json::to_string(&user).unwrap();
        let restored: User = serde_json::from_str(&cached).unwrap();
        assert_eq!(restored, user);
    }

    #[test]
    fn role_claim_merge_is_non_destructive() {
        let user = User::from_profile(json!({ "sub": "u-1", "roles": ["user"] })).unwrap();
        let merged = user.with_role_claim(&json!(["admin"]));
        assert!(merged.role_set().has_all_roles(&["admin", "user"]));
        assert!(!user.role_set().has_role("admin"));

        let again = merged.with_role_claim(&json!(["admin", "user"]));
        assert_eq!(again.roles.len(), 2);
    }
}
