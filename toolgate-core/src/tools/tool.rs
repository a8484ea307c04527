//! The `Tool` contract
//!
//! Tools are the side-effecting capabilities agents reach through the gate.
//! A tool only knows how to run; whether it may run is decided by the gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Name and description a tool is registered under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Registry key, and the name permissions refer to
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A capability the gate can invoke
///
/// Any error returned from `call` is handed back to the caller untouched and
/// counted against the gate's circuit breaker.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn description(&self) -> &str {
        &self.metadata().description
    }

    /// Run the tool with JSON arguments
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Async tool body without its own metadata
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> anyhow::Result<Value>;
}

/// Pairs a [`ToolHandler`] with the metadata it is registered under
pub struct HandlerTool<H> {
    metadata: ToolMetadata,
    handler: H,
}

impl<H: ToolHandler> HandlerTool<H> {
    pub fn new(metadata: ToolMetadata, handler: H) -> Self {
        Self { metadata, handler }
    }
}

#[async_trait]
impl<H: ToolHandler + 'static> Tool for HandlerTool<H> {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        self.handler.handle(args).await
    }
}

/// Tool backed by a synchronous closure
pub struct FnTool<F> {
    metadata: ToolMetadata,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            metadata: ToolMetadata::new(name, description),
            func,
        }
    }

    /// Wrap the tool for registration
    pub fn boxed(self) -> BoxedTool
    where
        F: 'static,
    {
        Arc::new(self)
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        (self.func)(args)
    }
}

/// Shared handle to a registered tool
pub type BoxedTool = Arc<dyn Tool>;
