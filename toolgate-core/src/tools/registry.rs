//! Capability registry: the lookup table from tool name to invocable tool
//!
//! The gate only ever needs [`CapabilityRegistry::lookup`]. Hosts can plug in
//! their own registry or use [`ToolRegistry`], which refuses to register two
//! tools under one name.

use super::tool::BoxedTool;
use std::collections::HashMap;
use std::sync::Arc;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// Read-only lookup contract the gate calls through
///
/// Implementations are shared between gates and read concurrently.
pub trait CapabilityRegistry: Send + Sync {
    /// Find the tool registered under `tool_name`
    fn lookup(&self, tool_name: &str) -> Option<BoxedTool>;

    fn contains(&self, tool_name: &str) -> bool {
        self.lookup(tool_name).is_some()
    }
}

impl CapabilityRegistry for HashMap<String, BoxedTool> {
    fn lookup(&self, tool_name: &str) -> Option<BoxedTool> {
        self.get(tool_name).cloned()
    }
}

impl<R: CapabilityRegistry + ?Sized> CapabilityRegistry for Arc<R> {
    fn lookup(&self, tool_name: &str) -> Option<BoxedTool> {
        (**self).lookup(tool_name)
    }
}

/// In-memory registry keyed by tool name
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name
    pub fn register(&mut self, tool: BoxedTool) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl CapabilityRegistry for ToolRegistry {
    fn lookup(&self, tool_name: &str) -> Option<BoxedTool> {
        self.tools.get(tool_name).cloned()
    }
}
