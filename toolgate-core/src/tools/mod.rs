//! Tool definitions and the capability registry
//!
//! # Example
//!
//! ```rust,no_run
//! use toolgate_core::tools::{CapabilityRegistry, FnTool, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(FnTool::new("echo", "Echoes input back", |args| Ok(args)).boxed())
//!     .unwrap();
//!
//! assert!(registry.lookup("echo").is_some());
//! ```

mod registry;
mod tool;

pub use registry::{CapabilityRegistry, RegistryError, ToolRegistry};
pub use tool::{BoxedTool, FnTool, HandlerTool, Tool, ToolHandler, ToolMetadata};
