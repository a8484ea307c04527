//! Audit trail for gated tool calls
//!
//! The gate emits exactly one [`AuditEvent`] per `invoke`, denials included.
//! Sinks are fire-and-forget: a sink error is logged by the gate and never
//! turns into a tool-call failure.

mod redact;
mod sink;

pub use redact::{ArgumentRedactor, DEFAULT_SENSITIVE_KEYS, REDACTED};
pub use sink::{ChannelAuditSink, InMemoryAuditSink, TracingAuditSink};

use crate::gate::{CircuitState, ToolCallOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Error raised by an audit sink
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Downstream channel is full
    #[error("Audit channel is full")]
    Full,
    /// Downstream consumer went away
    #[error("Audit channel is closed")]
    Closed,
    /// Event could not be encoded
    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Sink-specific failure
    #[error("Audit sink error: {0}")]
    Sink(String),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    /// Hand off one event. Must not block.
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError>;
}

impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).emit(event)
    }
}

/// Status recorded for an audited call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Denied,
    Failed,
}

/// Serializable view of a [`ToolCallOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub status: AuditStatus,
    /// Denial code, set when `status` is `denied`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error message, set when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ToolCallOutcome> for AuditOutcome {
    fn from(outcome: &ToolCallOutcome) -> Self {
        match outcome {
            ToolCallOutcome::Success(_) => Self {
                status: AuditStatus::Success,
                reason: None,
                error: None,
            },
            ToolCallOutcome::Denied(reason) => Self {
                status: AuditStatus::Denied,
                reason: Some(reason.as_str().to_string()),
                error: None,
            },
            ToolCallOutcome::Failed(err) => Self {
                status: AuditStatus::Failed,
                reason: None,
                error: Some(format!("{:#}", err.error())),
            },
        }
    }
}

/// One audited call attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub tool_name: String,
    /// Caller-supplied correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Arguments after redaction
    pub arguments: Value,
    /// Truncated SHA-256 of the unredacted arguments, for replay matching
    pub args_hash: String,
    pub outcome: AuditOutcome,
    pub breaker_state_after: CircuitState,
    /// Time spent inside the gate
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl AuditEvent {
    pub fn status(&self) -> AuditStatus {
        self.outcome.status
    }
}

/// Hash tool arguments the way audit records and replay tooling expect
pub fn args_hash(args: &Value) -> String {
    let args_json = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(args_json.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
