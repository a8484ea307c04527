//! Error types for Toolgate operations

use crate::tools::RegistryError;

/// Result type for Toolgate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Error types for the tool-call gate
///
/// The first seven variants mirror the denial and failure kinds a gated
/// call can end in. They are kept distinct on purpose: "ask a human",
/// "you lack permission" and "the dependency is unhealthy" call for
/// different reactions from the caller.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Breaker rejected the call; back off before retrying
    #[error("Circuit breaker is open, call blocked")]
    CircuitOpen,

    /// Permission set does not cover the tool
    #[error("Not authorized to use tool: {tool}")]
    NotAuthorized { tool: String },

    /// Registry has no such capability
    #[error("Tool '{tool}' not found in registry")]
    ToolNotFound { tool: String },

    /// Approval required but no adjudicator wired
    #[error("Tool '{tool}' requires approval but no adjudicator is configured")]
    ApprovalMisconfigured { tool: String },

    /// A human operator declined the call
    #[error("Tool call '{tool}' was rejected by the operator")]
    ApprovalRejected { tool: String },

    /// The approval wait was cancelled
    #[error("Approval for tool '{tool}' was cancelled")]
    ApprovalCancelled { tool: String },

    /// The tool itself failed
    #[error("Tool '{tool}' failed: {source}")]
    ExecutionFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Skill manifest error
    #[error("Skill error: {0}")]
    Skill(String),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Whether the caller may retry the same call later without a policy change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::CircuitOpen | GateError::ApprovalCancelled { .. }
        )
    }

    /// Whether this error was produced by the gate rather than the tool
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            GateError::CircuitOpen
                | GateError::NotAuthorized { .. }
                | GateError::ToolNotFound { .. }
                | GateError::ApprovalMisconfigured { .. }
                | GateError::ApprovalRejected { .. }
                | GateError::ApprovalCancelled { .. }
        )
    }
}

impl From<serde_yaml::Error> for GateError {
    fn from(err: serde_yaml::Error) -> Self {
        GateError::Skill(err.to_string())
    }
}

impl From<figment::Error> for GateError {
    fn from(err: figment::Error) -> Self {
        GateError::Configuration(err.to_string())
    }
}
