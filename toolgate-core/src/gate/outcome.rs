//! Outcome model for gated tool calls
//!
//! Every call through the gate ends in exactly one [`ToolCallOutcome`]:
//! the tool ran and succeeded, the gate refused to run it, or the tool ran
//! and failed. Denials are values, not errors, so callers must look at them.

use crate::error::GateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why the gate refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Breaker is open (or a trial call is already in flight)
    CircuitOpen,
    /// Tool is outside the agent's permission set
    NotAuthorized,
    /// Registry has no such tool
    ToolNotFound,
    /// Tool requires approval but the gate has no adjudicator
    ApprovalMisconfigured,
    /// A human operator said no
    RejectedByOperator,
    /// The call was cancelled while waiting for approval
    Cancelled,
}

impl DenialReason {
    /// Stable code used in logs and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::CircuitOpen => "circuit_open",
            DenialReason::NotAuthorized => "not_authorized",
            DenialReason::ToolNotFound => "tool_not_found",
            DenialReason::ApprovalMisconfigured => "approval_misconfigured",
            DenialReason::RejectedByOperator => "rejected_by_operator",
            DenialReason::Cancelled => "cancelled",
        }
    }

    /// Whether retrying the same call later can succeed without a policy change
    pub fn is_retryable(&self) -> bool {
        matches!(self, DenialReason::CircuitOpen | DenialReason::Cancelled)
    }

    /// Convert into the matching error kind for `tool`
    pub fn into_error(self, tool: impl Into<String>) -> GateError {
        let tool = tool.into();
        match self {
            DenialReason::CircuitOpen => GateError::CircuitOpen,
            DenialReason::NotAuthorized => GateError::NotAuthorized { tool },
            DenialReason::ToolNotFound => GateError::ToolNotFound { tool },
            DenialReason::ApprovalMisconfigured => GateError::ApprovalMisconfigured { tool },
            DenialReason::RejectedByOperator => GateError::ApprovalRejected { tool },
            DenialReason::Cancelled => GateError::ApprovalCancelled { tool },
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool failure, carrying the tool's original error untouched
#[derive(Debug)]
pub struct ExecutionError {
    tool: String,
    source: anyhow::Error,
}

impl ExecutionError {
    pub fn new(tool: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            tool: tool.into(),
            source,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// The error the tool returned
    pub fn error(&self) -> &anyhow::Error {
        &self.source
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tool '{}' failed: {}", self.tool, self.source)
    }
}

impl From<ExecutionError> for GateError {
    fn from(err: ExecutionError) -> Self {
        GateError::ExecutionFailed {
            tool: err.tool,
            source: err.source,
        }
    }
}

/// Final result of one `invoke` call
#[derive(Debug)]
pub enum ToolCallOutcome {
    /// Tool ran and returned a value
    Success(Value),
    /// Gate refused to run the tool
    Denied(DenialReason),
    /// Tool ran and failed
    Failed(ExecutionError),
}

impl ToolCallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolCallOutcome::Success(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ToolCallOutcome::Denied(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ToolCallOutcome::Failed(_))
    }

    /// Get the value if successful
    pub fn value(&self) -> Option<&Value> {
        match self {
            ToolCallOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Get the denial reason if denied
    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            ToolCallOutcome::Denied(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Get the execution error if the tool failed
    pub fn failure(&self) -> Option<&ExecutionError> {
        match self {
            ToolCallOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Convert into a `Result` for `?`-style handling
    pub fn into_result(self, tool: &str) -> Result<Value, GateError> {
        match self {
            ToolCallOutcome::Success(value) => Ok(value),
            ToolCallOutcome::Denied(reason) => Err(reason.into_error(tool)),
            ToolCallOutcome::Failed(err) => Err(err.into()),
        }
    }
}
