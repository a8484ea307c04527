//! Authorization policy: which tools an agent may call, and which of those
//! need a live human decision.
//!
//! Grants only ever grow. Removing a capability means building a new
//! policy, so a concurrent reader can never observe a half-revoked set.

use crate::identity::{AgentIdentity, WILDCARD};
use crate::skills::SkillManifest;
use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock};

/// Result of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    NotAllowed,
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Authorization::Authorized)
    }
}

/// Permission and approval rule set for one agent's gate
#[derive(Debug, Default)]
pub struct AuthorizationPolicy {
    allowed_tools: RwLock<HashSet<String>>,
    approval_required: HashSet<String>,
}

impl AuthorizationPolicy {
    /// Create a policy that allows nothing
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Create a policy that allows every tool (approval rules still apply)
    pub fn allow_all() -> Self {
        Self::from_tools([WILDCARD])
    }

    /// Create a policy allowing the given tool names
    pub fn from_tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tools: RwLock::new(tools.into_iter().map(Into::into).collect()),
            approval_required: HashSet::new(),
        }
    }

    /// Create a policy from an agent's declared permissions
    pub fn from_identity(identity: &AgentIdentity) -> Self {
        Self::from_tools(identity.permissions().iter().cloned())
    }

    /// Builder: mark tools as requiring human approval
    pub fn require_approval<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_required
            .extend(tools.into_iter().map(Into::into));
        self
    }

    /// Check whether `tool_name` is covered by the allowed set
    pub fn authorize(&self, tool_name: &str) -> Authorization {
        let allowed = self
            .allowed_tools
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if allowed.contains(WILDCARD) || allowed.contains(tool_name) {
            Authorization::Authorized
        } else {
            Authorization::NotAllowed
        }
    }

    /// Check whether `tool_name` needs a recorded approval before it runs
    ///
    /// Independent of the wildcard: `"*"` never waives approval.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.approval_required.contains(tool_name)
    }

    /// Union `permissions` into the allowed set
    ///
    /// Idempotent. Returns how many entries were new.
    pub fn grant<I, S>(&self, permissions: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut allowed = self
            .allowed_tools
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = allowed.len();
        allowed.extend(permissions.into_iter().map(Into::into));
        let added = allowed.len() - before;
        if added > 0 {
            tracing::debug!(added, total = allowed.len(), "Expanded tool grants");
        }
        added
    }

    /// Grant every permission a skill manifest declares
    pub fn grant_skill(&self, manifest: &SkillManifest) -> usize {
        let added = self.grant(manifest.permissions.iter().cloned());
        tracing::info!(skill = %manifest.name, added, "Attached skill permissions");
        added
    }

    /// Snapshot of the allowed set, sorted
    pub fn allowed_tools(&self) -> BTreeSet<String> {
        self.allowed_tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Tools flagged as approval-required, sorted
    pub fn approval_required(&self) -> BTreeSet<String> {
        self.approval_required.iter().cloned().collect()
    }

    /// True when at least one tool needs approval
    pub fn has_approval_rules(&self) -> bool {
        !self.approval_required.is_empty()
    }
}

impl Clone for AuthorizationPolicy {
    fn clone(&self) -> Self {
        Self {
            allowed_tools: RwLock::new(
                self.allowed_tools
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            approval_required: self.approval_required.clone(),
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_deny_all_default() {
        let policy = AuthorizationPolicy::deny_all();
        assert_eq!(policy.authorize("read_file"), Authorization::NotAllowed);
        assert!(!policy.has_approval_rules());
    }

    #[test]
    fn test_exact_membership() {
        let policy = AuthorizationPolicy::from_tools(["read_file"]);

        assert!(policy.authorize("read_file").is_authorized());
        assert_eq!(policy.authorize("write_file"), Authorization::NotAllowed);
        assert_eq!(policy.authorize("read_file_extra"), Authorization::NotAllowed);
    }

    #[test]
    fn test_wildcard_allows_anything() {
        let policy = AuthorizationPolicy::allow_all();

        for tool in ["read_file", "deploy", "", "rm -rf"] {
            assert!(policy.authorize(tool).is_authorized(), "{tool} should be allowed");
        }
    }

    #[test]
    fn test_wildcard_does_not_waive_approval() {
        let policy = AuthorizationPolicy::allow_all().require_approval(["deploy"]);

        assert!(policy.authorize("deploy").is_authorized());
        assert!(policy.requires_approval("deploy"));
        assert!(!policy.requires_approval("read_file"));
    }

    #[test]
    fn test_grant_is_monotonic_and_idempotent() {
        let policy = AuthorizationPolicy::from_tools(["read_file"]);

        assert_eq!(policy.grant(["write_file", "read_file"]), 1);
        assert_eq!(policy.grant(["write_file"]), 0);

        let allowed = policy.allowed_tools();
        assert!(allowed.contains("read_file"));
        assert!(allowed.contains("write_file"));
        assert_eq!(allowed.len(), 2);
    }

    #[test]
    fn test_from_identity() {
        let identity = AgentIdentity::builder()
            .id("1")
            .permissions(["fs:read", "net:fetch"])
            .build();
        let policy = AuthorizationPolicy::from_identity(&identity);

        assert!(policy.authorize("fs:read").is_authorized());
        assert!(policy.authorize("net:fetch").is_authorized());
        assert!(!policy.authorize("fs:write").is_authorized());
    }

    #[test]
    fn test_grant_skill() {
        let manifest = SkillManifest::from_yaml_str(
            "name: deployer\nversion: 1.0.0\ndescription: Ships code\npermissions: [deploy, git_push]\n",
        )
        .unwrap();
        let policy = AuthorizationPolicy::deny_all();

        assert_eq!(policy.grant_skill(&manifest), 2);
        assert!(policy.authorize("deploy").is_authorized());
        assert!(policy.authorize("git_push").is_authorized());
    }

    #[test]
    fn test_concurrent_grant_and_authorize() {
        let policy = Arc::new(AuthorizationPolicy::from_tools(["base"]));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        policy.grant([format!("tool_{i}_{j}")]);
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(policy.authorize("base").is_authorized());
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
        assert_eq!(policy.allowed_tools().len(), 1 + 8 * 50);
    }
}
