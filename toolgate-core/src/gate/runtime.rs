//! Tool-call gate: the one door every agent tool call goes through
//!
//! `invoke` runs a fixed pipeline:
//! 1. breaker admission
//! 2. authorization
//! 3. registry lookup
//! 4. human approval, when the tool requires it
//! 5. execution, with the outcome recorded against the breaker
//!
//! Whatever happens, exactly one [`AuditEvent`] is emitted per call.

use super::approval::{ApprovalAdjudicator, ApprovalRequest};
use super::breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig};
use super::outcome::{DenialReason, ExecutionError, ToolCallOutcome};
use super::policy::AuthorizationPolicy;
use crate::audit::{ArgumentRedactor, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink, args_hash};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::identity::{AgentIdentity, WILDCARD};
use crate::skills::SkillManifest;
use crate::tools::{BoxedTool, CapabilityRegistry};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call context
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Trace ID for correlation
    pub trace_id: Option<String>,

    /// Cancels a pending approval wait
    pub cancellation: Option<CancellationToken>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Error carried by `Failed` when a tool overruns the execution timeout
#[derive(Debug, thiserror::Error)]
#[error("Tool '{tool}' timed out after {limit:?}")]
pub struct ExecutionTimeout {
    pub tool: String,
    pub limit: Duration,
}

/// Error carried by `Failed` when a tool panics
#[derive(Debug, thiserror::Error)]
#[error("Tool '{tool}' panicked: {message}")]
pub struct ExecutionPanicked {
    pub tool: String,
    pub message: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Authorization, approval and circuit breaking in front of a capability registry
///
/// One gate belongs to one agent: its breaker and policy are never shared.
/// The registry may be shared freely.
pub struct ToolCallGate {
    registry: Arc<dyn CapabilityRegistry>,
    breaker: CircuitBreaker,
    policy: AuthorizationPolicy,
    adjudicator: Option<Arc<dyn ApprovalAdjudicator>>,
    audit: Arc<dyn AuditSink>,
    redactor: ArgumentRedactor,
    execution_timeout: Option<Duration>,
}

impl ToolCallGate {
    /// Start building a gate over `registry`
    pub fn builder<R: CapabilityRegistry + 'static>(registry: R) -> GateBuilder {
        GateBuilder::new(registry)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn has_adjudicator(&self) -> bool {
        self.adjudicator.is_some()
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Fail when an approval-required tool has nobody to approve it
    pub fn validate(&self) -> Result<()> {
        if self.adjudicator.is_some() {
            return Ok(());
        }
        match self.policy.approval_required().into_iter().next() {
            Some(tool) => Err(GateError::ApprovalMisconfigured { tool }),
            None => Ok(()),
        }
    }

    /// Widen the agent's grants; returns how many were new
    pub fn grant<I, S>(&self, permissions: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.grant(permissions)
    }

    /// Grant the permissions of an attached skill
    pub fn grant_skill(&self, manifest: &SkillManifest) -> usize {
        self.policy.grant_skill(manifest)
    }

    /// Bind this gate to one agent identity
    pub fn bind(self: Arc<Self>, identity: AgentIdentity) -> BoundGate {
        BoundGate {
            gate: self,
            identity,
        }
    }

    /// Run `tool_name` for `agent` through the full pipeline
    pub async fn invoke(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        arguments: Value,
    ) -> ToolCallOutcome {
        self.invoke_with(agent, tool_name, arguments, &CallContext::default())
            .await
    }

    /// [`invoke`](Self::invoke) with a per-call context
    pub async fn invoke_with(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> ToolCallOutcome {
        let record = AuditRecord {
            gate: self,
            started: Instant::now(),
            agent_id: agent.id().to_string(),
            tool_name: tool_name.to_string(),
            trace_id: ctx.trace_id.clone(),
            args_hash: args_hash(&arguments),
            arguments: self.redactor.redact(&arguments),
            closed: false,
        };

        let outcome = self
            .adjudicate(agent, tool_name, arguments, &record.arguments, ctx)
            .await;

        record.close(&outcome);
        outcome
    }

    /// Like [`invoke`](Self::invoke), but denials and failures become errors
    pub async fn call(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value> {
        self.invoke(agent, tool_name, arguments)
            .await
            .into_result(tool_name)
    }

    async fn adjudicate(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        arguments: Value,
        shown: &Value,
        ctx: &CallContext,
    ) -> ToolCallOutcome {
        let Some(permit) = self.breaker.try_acquire() else {
            return self.deny(agent, tool_name, DenialReason::CircuitOpen);
        };

        if !self.policy.authorize(tool_name).is_authorized() {
            return self.deny(agent, tool_name, DenialReason::NotAuthorized);
        }

        let Some(tool) = self.registry.lookup(tool_name) else {
            return self.deny(agent, tool_name, DenialReason::ToolNotFound);
        };

        if self.policy.requires_approval(tool_name)
            && let Some(reason) = self.seek_approval(agent, tool_name, shown, ctx).await
        {
            return self.deny(agent, tool_name, reason);
        }

        self.execute(agent, tool_name, tool, arguments, permit).await
    }

    /// `None` means approved
    async fn seek_approval(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        shown: &Value,
        ctx: &CallContext,
    ) -> Option<DenialReason> {
        let Some(adjudicator) = &self.adjudicator else {
            tracing::error!(
                agent_id = %agent.id(),
                tool = %tool_name,
                "Tool requires approval but no adjudicator is configured"
            );
            return Some(DenialReason::ApprovalMisconfigured);
        };

        if ctx.is_cancelled() {
            return Some(DenialReason::Cancelled);
        }

        let request = ApprovalRequest::new(agent.id(), tool_name, shown.clone());
        tracing::info!(
            agent_id = %agent.id(),
            tool = %tool_name,
            request_id = %request.request_id,
            "Awaiting approval"
        );

        let approved = match &ctx.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Some(DenialReason::Cancelled),
                approved = adjudicator.decide(&request) => approved,
            },
            None => adjudicator.decide(&request).await,
        };

        if approved {
            None
        } else {
            Some(DenialReason::RejectedByOperator)
        }
    }

    async fn execute(
        &self,
        agent: &AgentIdentity,
        tool_name: &str,
        tool: BoxedTool,
        arguments: Value,
        permit: BreakerPermit<'_>,
    ) -> ToolCallOutcome {
        let call = AssertUnwindSafe(tool.call(arguments)).catch_unwind();
        let caught = match self.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(ExecutionTimeout {
                    tool: tool_name.to_string(),
                    limit,
                }
                .into())),
            },
            None => call.await,
        };
        let result = caught.unwrap_or_else(|payload| {
            Err(ExecutionPanicked {
                tool: tool_name.to_string(),
                message: panic_message(payload.as_ref()),
            }
            .into())
        });

        match result {
            Ok(value) => {
                let state = permit.succeed();
                tracing::debug!(agent_id = %agent.id(), tool = %tool_name, breaker = %state, "Tool call succeeded");
                ToolCallOutcome::Success(value)
            }
            Err(err) => {
                let state = permit.fail();
                tracing::warn!(
                    agent_id = %agent.id(),
                    tool = %tool_name,
                    breaker = %state,
                    error = %err,
                    "Tool call failed"
                );
                ToolCallOutcome::Failed(ExecutionError::new(tool_name, err))
            }
        }
    }

    fn deny(&self, agent: &AgentIdentity, tool_name: &str, reason: DenialReason) -> ToolCallOutcome {
        tracing::warn!(
            agent_id = %agent.id(),
            tool = %tool_name,
            reason = %reason,
            "Tool call denied"
        );
        ToolCallOutcome::Denied(reason)
    }
}

/// Audit details of one call, emitted exactly once
///
/// A call whose future is dropped before it finishes is recorded as
/// `cancelled` when the record goes out of scope.
struct AuditRecord<'a> {
    gate: &'a ToolCallGate,
    started: Instant,
    agent_id: String,
    tool_name: String,
    trace_id: Option<String>,
    args_hash: String,
    arguments: Value,
    closed: bool,
}

impl AuditRecord<'_> {
    fn close(mut self, outcome: &ToolCallOutcome) {
        self.emit(AuditOutcome::from(outcome));
        self.closed = true;
    }

    fn emit(&mut self, outcome: AuditOutcome) {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_id: self.agent_id.clone(),
            tool_name: self.tool_name.clone(),
            trace_id: self.trace_id.take(),
            arguments: self.arguments.take(),
            args_hash: std::mem::take(&mut self.args_hash),
            outcome,
            breaker_state_after: self.gate.breaker.state(),
            duration: self.started.elapsed(),
        };
        if let Err(err) = self.gate.audit.emit(event) {
            tracing::warn!(
                agent_id = %self.agent_id,
                tool = %self.tool_name,
                error = %err,
                "Failed to emit audit event"
            );
        }
    }
}

impl Drop for AuditRecord<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(
            agent_id = %self.agent_id,
            tool = %self.tool_name,
            "Tool call dropped before completion"
        );
        self.emit(AuditOutcome::from(&ToolCallOutcome::Denied(DenialReason::Cancelled)));
    }
}

impl std::fmt::Debug for ToolCallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallGate")
            .field("breaker", &self.breaker)
            .field("policy", &self.policy)
            .field("has_adjudicator", &self.adjudicator.is_some())
            .field("execution_timeout", &self.execution_timeout)
            .finish()
    }
}

/// Builder for [`ToolCallGate`]
pub struct GateBuilder {
    registry: Arc<dyn CapabilityRegistry>,
    breaker_config: CircuitBreakerConfig,
    allowed_tools: Vec<String>,
    approval_required: Vec<String>,
    adjudicator: Option<Arc<dyn ApprovalAdjudicator>>,
    audit: Option<Arc<dyn AuditSink>>,
    redactor: ArgumentRedactor,
    execution_timeout: Option<Duration>,
}

impl GateBuilder {
    pub fn new<R: CapabilityRegistry + 'static>(registry: R) -> Self {
        Self {
            registry: Arc::new(registry),
            breaker_config: CircuitBreakerConfig::default(),
            allowed_tools: Vec::new(),
            approval_required: Vec::new(),
            adjudicator: None,
            audit: None,
            redactor: ArgumentRedactor::default(),
            execution_timeout: None,
        }
    }

    /// Start from a loaded [`GateConfig`]
    pub fn from_config<R: CapabilityRegistry + 'static>(
        registry: R,
        config: &GateConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new(registry)
            .breaker_config(config.breaker_config())
            .allowed_tools(config.allowed_tools.iter().cloned())
            .approval_required(config.approval.required.iter().cloned())
            .redactor(config.audit.redactor()?);
        builder.execution_timeout = config.execution_timeout;
        Ok(builder)
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Allow tools by name (`"*"` allows all)
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Allow whatever the agent's identity declares
    pub fn policy_from_identity(self, identity: &AgentIdentity) -> Self {
        self.allowed_tools(identity.permissions().iter().cloned())
    }

    pub fn approval_required<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_required
            .extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn adjudicator(mut self, adjudicator: impl ApprovalAdjudicator + 'static) -> Self {
        self.adjudicator = Some(Arc::new(adjudicator));
        self
    }

    /// Use an adjudicator that is shared with other gates
    pub fn shared_adjudicator(mut self, adjudicator: Arc<dyn ApprovalAdjudicator>) -> Self {
        self.adjudicator = Some(adjudicator);
        self
    }

    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(sink));
        self
    }

    /// Use an audit sink that is shared with other gates
    pub fn shared_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn redactor(mut self, redactor: ArgumentRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Build the gate
    ///
    /// A missing adjudicator for approval-required tools is logged at error
    /// level here and denied on every call. Use
    /// [`build_strict`](Self::build_strict) to refuse it up front.
    pub fn build(self) -> ToolCallGate {
        let gate = ToolCallGate {
            registry: self.registry,
            breaker: CircuitBreaker::new(self.breaker_config),
            policy: AuthorizationPolicy::from_tools(self.allowed_tools)
                .require_approval(self.approval_required),
            adjudicator: self.adjudicator,
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(TracingAuditSink)),
            redactor: self.redactor,
            execution_timeout: self.execution_timeout,
        };

        if let Err(err) = gate.validate() {
            tracing::error!(
                error = %err,
                tools = ?gate.policy.approval_required(),
                "Gate built without an approval adjudicator; approval-required tools will be denied"
            );
        }
        gate
    }

    /// Build the gate, failing on approval misconfiguration
    pub fn build_strict(self) -> Result<ToolCallGate> {
        let gate = self.build();
        gate.validate()?;
        Ok(gate)
    }
}

/// A gate bound to one agent
///
/// Handed to third-party agents so the only way they reach a tool is
/// through the gate, under their own identity.
#[derive(Debug, Clone)]
pub struct BoundGate {
    gate: Arc<ToolCallGate>,
    identity: AgentIdentity,
}

impl BoundGate {
    pub fn new(gate: Arc<ToolCallGate>, identity: AgentIdentity) -> Self {
        Self { gate, identity }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn gate(&self) -> &ToolCallGate {
        &self.gate
    }

    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> ToolCallOutcome {
        self.gate.invoke(&self.identity, tool_name, arguments).await
    }

    pub async fn invoke_with(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> ToolCallOutcome {
        self.gate
            .invoke_with(&self.identity, tool_name, arguments, ctx)
            .await
    }

    pub async fn call(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.gate.call(&self.identity, tool_name, arguments).await
    }

    /// Concrete tool names the agent is granted, sorted; the wildcard is left out
    pub fn allowed_tool_names(&self) -> Vec<String> {
        self.gate
            .policy
            .allowed_tools()
            .into_iter()
            .filter(|name| name != WILDCARD)
            .collect()
    }
}
