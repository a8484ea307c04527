//! Agent identity
//!
//! An identity is created once per agent and never mutated. Growing an
//! agent's permissions produces a new identity value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Permission entry that covers every tool
pub const WILDCARD: &str = "*";

/// Unique, immutable identity of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    permissions: BTreeSet<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl AgentIdentity {
    /// Create an identity with no permissions
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            permissions: BTreeSet::new(),
            metadata: HashMap::new(),
        }
    }

    /// Start building an identity
    pub fn builder() -> AgentIdentityBuilder {
        AgentIdentityBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Check whether this identity may act within `scope`
    pub fn can_execute_scope(&self, scope: &str) -> bool {
        self.permissions.contains(WILDCARD) || self.permissions.contains(scope)
    }

    /// Return a new identity with `permissions` added to the current set
    pub fn with_permissions<I, S>(&self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.permissions.extend(permissions.into_iter().map(Into::into));
        next
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.id)
    }
}

/// Builder for [`AgentIdentity`]
#[derive(Debug, Default)]
pub struct AgentIdentityBuilder {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    permissions: BTreeSet<String>,
    metadata: HashMap<String, Value>,
}

impl AgentIdentityBuilder {
    /// Set the agent id (defaults to a random UUID)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the display name (defaults to the id)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add one permission
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Add several permissions
    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Attach a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AgentIdentity {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        AgentIdentity {
            name: self.name.unwrap_or_else(|| id.clone()),
            version: self.version.unwrap_or_else(|| "0.0.0".to_string()),
            id,
            permissions: self.permissions,
            metadata: self.metadata,
        }
    }
}
