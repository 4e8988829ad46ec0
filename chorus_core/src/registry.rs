//! Role → capability module registry.
//!
//! The order of roles is significant: after discovery, peer *i* is offered
//! role *i*. Surplus peers get nothing; surplus roles stay unassigned.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;

/// One role and the capability modules a worker must load to serve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role identifier (e.g. "neural", "memory")
    pub name: String,
    
    /// Capability modules to load, by name
    #[serde(default)]
    pub modules: Vec<String>,
}

impl RoleSpec {
    /// Creates a role spec.
    pub fn new<I, S>(name: impl Into<String>, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered, duplicate-free list of roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RoleSpec>", into = "Vec<RoleSpec>")]
pub struct RoleRegistry {
    roles: Vec<RoleSpec>,
}

impl RoleRegistry {
    /// Builds a registry, rejecting duplicate role names.
    pub fn new(roles: Vec<RoleSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for role in &roles {
            if role.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "roles",
                    reason: "role names must not be empty".to_string(),
                });
            }
            if !seen.insert(role.name.as_str()) {
                return Err(ConfigError::DuplicateRole(role.name.clone()));
            }
        }
        Ok(Self { roles })
    }
    
    /// All roles, in assignment order.
    pub fn roles(&self) -> &[RoleSpec] {
        &self.roles
    }
    
    /// Role names, in assignment order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|r| r.name.as_str())
    }
    
    /// Looks up a role by name.
    pub fn get(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }
    
    /// Modules required by a role.
    pub fn modules_for(&self, name: &str) -> Option<&[String]> {
        self.get(name).map(|r| r.modules.as_slice())
    }
    
    pub fn len(&self) -> usize {
        self.roles.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self {
            roles: vec![
                RoleSpec::new("neural", ["neural_net", "attention"]),
                RoleSpec::new("memory", ["memory_store"]),
                RoleSpec::new("generation", ["markov", "templates"]),
                RoleSpec::new("context", ["context_tracker"]),
            ],
        }
    }
}

/// Collects roles in order; a repeated name keeps its first occurrence.
impl FromIterator<RoleSpec> for RoleRegistry {
    fn from_iter<I: IntoIterator<Item = RoleSpec>>(iter: I) -> Self {
        let mut roles: Vec<RoleSpec> = Vec::new();
        for role in iter {
            if !roles.iter().any(|r| r.name == role.name) {
                roles.push(role);
            }
        }
        Self { roles }
    }
}

impl TryFrom<Vec<RoleSpec>> for RoleRegistry {
    type Error = ConfigError;

    fn try_from(roles: Vec<RoleSpec>) -> Result<Self, Self::Error> {
        Self::new(roles)
    }
}

impl From<RoleRegistry> for Vec<RoleSpec> {
    fn from(registry: RoleRegistry) -> Self {
        registry.roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let registry = RoleRegistry::default();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["neural", "memory", "generation", "context"]);
        assert_eq!(registry.modules_for("memory"), Some(&["memory_store".to_string()][..]));
        assert_eq!(registry.modules_for("vision"), None);
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let err = RoleRegistry::new(vec![
            RoleSpec::new("alpha", ["diagnostics"]),
            RoleSpec::new("alpha", ["other"]),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRole(name) if name == "alpha"));
    }

    #[test]
    fn test_collect_keeps_first_duplicate() {
        let registry: RoleRegistry = [
            RoleSpec::new("alpha", ["a"]),
            RoleSpec::new("beta", ["b"]),
            RoleSpec::new("alpha", ["z"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.modules_for("alpha"), Some(&["a".to_string()][..]));
    }

    #[test]
    fn test_deserialize_preserves_order() {
        let raw = r#"[{"name": "beta", "modules": ["b"]}, {"name": "alpha"}]"#;
        let registry: RoleRegistry = serde_json::from_str(raw).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["beta", "alpha"]);
        assert!(registry.get("alpha").unwrap().modules.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_duplicates() {
        let raw = r#"[{"name": "x"}, {"name": "x"}]"#;
        assert!(serde_json::from_str::<RoleRegistry>(raw).is_err());
    }
}
