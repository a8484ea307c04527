//! # Toolgate - authorization, approval and circuit breaking for agent tool calls
//!
//! Every side-effecting tool an autonomous agent wants to run goes through a
//! [`ToolCallGate`](gate::ToolCallGate). The gate enforces, in order:
//! - a per-gate circuit breaker with a single half-open trial permit
//! - the agent's tool permissions (`"*"` grants everything)
//! - a live human decision for tools marked approval-required, failing closed
//!   when nobody is wired up to decide
//!
//! and emits exactly one audit event per call, denials included.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolgate_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut registry = ToolRegistry::new();
//!     registry.register(
//!         FnTool::new("read_file", "Read a file", |args| Ok(json!({"path": args["path"]}))).boxed(),
//!     )?;
//!
//!     let agent = AgentIdentity::builder().id("agent-1").permission("read_file").build();
//!     let gate = ToolCallGate::builder(registry)
//!         .policy_from_identity(&agent)
//!         .build_strict()?;
//!
//!     let contents = gate.call(&agent, "read_file", json!({"path": "README.md"})).await?;
//!     println!("{contents}");
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod skills;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{
        ArgumentRedactor, AuditEvent, AuditOutcome, AuditSink, AuditStatus, ChannelAuditSink,
        InMemoryAuditSink, TracingAuditSink,
    };
    pub use crate::config::GateConfig;
    pub use crate::error::{GateError, Result};
    pub use crate::gate::{
        ApprovalAdjudicator, ApprovalRequest, BoundGate, CallContext, CircuitBreaker,
        CircuitBreakerConfig, CircuitState, DenialReason, FnAdjudicator, GateBuilder,
        StaticAdjudicator, ToolCallGate, ToolCallOutcome, approval_channel,
    };
    pub use crate::identity::AgentIdentity;
    pub use crate::skills::SkillManifest;
    pub use crate::tools::{BoxedTool, CapabilityRegistry, FnTool, Tool, ToolRegistry};
}
