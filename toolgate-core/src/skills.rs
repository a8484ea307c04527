//! Skill manifests
//!
//! A skill ships a YAML manifest. The gate only cares about the
//! `permissions` list, which is granted to an agent's policy when the skill is
//! attached at runtime.

use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A command exposed by a skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCommand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parsed skill manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub commands: Vec<SkillCommand>,
    /// Tool names the skill needs; granted to the agent when attached
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

impl SkillManifest {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let manifest: SkillManifest = serde_yaml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GateError::Skill("manifest name must not be empty".to_string()));
        }
        if let Some(perm) = self.permissions.iter().find(|p| p.trim().is_empty()) {
            return Err(GateError::Skill(format!(
                "skill '{}' declares an empty permission {:?}",
                self.name, perm
            )));
        }
        Ok(())
    }
}
