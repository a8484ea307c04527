//! The tool-call gate and its parts
//!
//! - [`CircuitBreaker`]: backs off a failing dependency, one trial call at a time
//! - [`AuthorizationPolicy`]: which tools an agent may call and which need approval
//! - [`ApprovalAdjudicator`]: the human in the loop
//! - [`ToolCallGate`]: runs every call through all of the above

pub mod approval;
pub mod breaker;
pub mod outcome;
pub mod policy;
pub mod runtime;

#[cfg(test)]
mod tests;

pub use approval::{
    ApprovalAdjudicator, ApprovalInbox, ApprovalRequest, ApprovalResolver, FnAdjudicator,
    QueuedAdjudicator, StaticAdjudicator, approval_channel,
};
pub use breaker::{Admission, BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use outcome::{DenialReason, ExecutionError, ToolCallOutcome};
pub use policy::{Authorization, AuthorizationPolicy};
pub use runtime::{BoundGate, CallContext, ExecutionPanicked, ExecutionTimeout, GateBuilder, ToolCallGate};
