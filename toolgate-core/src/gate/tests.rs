use super::*;
use crate::audit::{AuditError, AuditEvent, AuditSink, AuditStatus, InMemoryAuditSink, REDACTED, args_hash};
use crate::error::GateError;
use crate::identity::AgentIdentity;
use crate::skills::SkillManifest;
use crate::tools::{BoxedTool, CapabilityRegistry, FnTool, HandlerTool, ToolHandler, ToolMetadata, ToolRegistry};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Registry wrapper that counts lookups
struct CountingRegistry {
    inner: ToolRegistry,
    lookups: AtomicUsize,
}

impl CapabilityRegistry for CountingRegistry {
    fn lookup(&self, tool_name: &str) -> Option<BoxedTool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(tool_name)
    }
}

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl ToolHandler for SlowHandler {
    async fn handle(&self, _args: Value) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!("done"))
    }
}

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn emit(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Closed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("disk full")]
struct DiskFull;

/// Tools used across the scenarios. `calls` counts executions of every tool.
fn registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let counter = Arc::clone(&calls);
    registry
        .register(
            FnTool::new("read_file", "Read a file", move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"path": args["path"], "contents": "hello"}))
            })
            .boxed(),
        )
        .unwrap();
    let counter = Arc::clone(&calls);
    registry
        .register(
            FnTool::new("write_file", "Write a file", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DiskFull.into())
            })
            .boxed(),
        )
        .unwrap();
    let counter = Arc::clone(&calls);
    registry
        .register(
            FnTool::new("x", "Fails when asked to", move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                if args["fail"] == json!(true) {
                    anyhow::bail!("Tool failed!");
                }
                Ok(json!("ok"))
            })
            .boxed(),
        )
        .unwrap();
    let counter = Arc::clone(&calls);
    registry
        .register(
            FnTool::new("deploy", "Deploy to an environment", move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"deployed": args["target"]}))
            })
            .boxed(),
        )
        .unwrap();
    let counter = Arc::clone(&calls);
    registry
        .register(
            FnTool::new("panics", "Panics on every call", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("index out of range")
            })
            .boxed(),
        )
        .unwrap();
    registry
        .register(Arc::new(HandlerTool::new(
            ToolMetadata::new("slow", "Takes its time"),
            SlowHandler {
                delay: Duration::from_secs(10),
            },
        )))
        .unwrap();
    registry
}

fn agent() -> AgentIdentity {
    AgentIdentity::builder().id("agent-1").name("tester").build()
}

struct Harness {
    gate: Arc<ToolCallGate>,
    audit: Arc<InMemoryAuditSink>,
    calls: Arc<AtomicUsize>,
}

fn harness(configure: impl FnOnce(GateBuilder) -> GateBuilder) -> Harness {
    let calls = Arc::new(AtomicUsize::new(0));
    let audit = Arc::new(InMemoryAuditSink::new());
    let builder = ToolCallGate::builder(registry(Arc::clone(&calls))).audit_sink(Arc::clone(&audit));
    Harness {
        gate: Arc::new(configure(builder).build()),
        audit,
        calls,
    }
}

#[tokio::test]
async fn test_circuit_opens_without_touching_registry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let audit = Arc::new(InMemoryAuditSink::new());
    let counting = Arc::new(CountingRegistry {
        inner: registry(Arc::clone(&calls)),
        lookups: AtomicUsize::new(0),
    });
    let gate = ToolCallGate::builder(Arc::clone(&counting))
        .breaker_config(CircuitBreakerConfig::default().with_failure_threshold(2))
        .allowed_tools(["x"])
        .audit_sink(Arc::clone(&audit))
        .build();

    for _ in 0..2 {
        let outcome = gate.invoke(&agent(), "x", json!({"fail": true})).await;
        assert!(outcome.is_failed());
    }
    assert_eq!(gate.breaker().state(), CircuitState::Open);

    let outcome = gate.invoke(&agent(), "x", json!({"fail": true})).await;
    assert_eq!(outcome.denial(), Some(DenialReason::CircuitOpen));
    assert_eq!(counting.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let events = audit.events();
    assert_eq!(events.len(), 3);
    let last = &events[2];
    assert_eq!(last.status(), AuditStatus::Denied);
    assert_eq!(last.outcome.reason.as_deref(), Some("circuit_open"));
    assert_eq!(last.breaker_state_after, CircuitState::Open);
}

#[tokio::test]
async fn test_not_authorized_is_audited() {
    let h = harness(|b| b.allowed_tools(["read_file"]));

    let outcome = h.gate.invoke(&agent(), "write_file", json!({"path": "/etc/passwd"})).await;

    assert_eq!(outcome.denial(), Some(DenialReason::NotAuthorized));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_name, "write_file");
    assert_eq!(events[0].agent_id, "agent-1");
    assert_eq!(events[0].outcome.reason.as_deref(), Some("not_authorized"));
}

#[tokio::test]
async fn test_unknown_tool_is_not_found() {
    let h = harness(|b| b.allowed_tools(["*"]));

    let outcome = h.gate.invoke(&agent(), "format_disk", json!({})).await;

    assert_eq!(outcome.denial(), Some(DenialReason::ToolNotFound));
    assert_eq!(h.audit.len(), 1);
}

#[tokio::test]
async fn test_wildcard_authorizes_everything() {
    let h = harness(|b| b.allowed_tools(["*"]));

    let outcome = h.gate.invoke(&agent(), "read_file", json!({"path": "a"})).await;

    assert_eq!(outcome.value().unwrap()["contents"], "hello");
    assert_eq!(h.audit.last().unwrap().status(), AuditStatus::Success);
}

#[tokio::test]
async fn test_operator_rejection() {
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(StaticAdjudicator::deny_all())
    });

    let outcome = h.gate.invoke(&agent(), "deploy", json!({"target": "prod"})).await;

    assert_eq!(outcome.denial(), Some(DenialReason::RejectedByOperator));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        outcome.into_result("deploy"),
        Err(GateError::ApprovalRejected { .. })
    ));
    assert_eq!(h.audit.last().unwrap().outcome.reason.as_deref(), Some("rejected_by_operator"));
}

#[tokio::test]
async fn test_operator_approval_runs_tool() {
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(FnAdjudicator::new(|tool: &str, args: &Value| {
                tool == "deploy" && args["target"] == "staging"
            }))
    });

    let outcome = h.gate.invoke(&agent(), "deploy", json!({"target": "staging"})).await;

    assert_eq!(outcome.value(), Some(&json!({"deployed": "staging"})));
    assert_eq!(h.gate.breaker().consecutive_failures(), 0);
    assert_eq!(h.gate.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_missing_adjudicator_fails_closed_even_with_wildcard() {
    let h = harness(|b| b.allowed_tools(["*"]).approval_required(["deploy"]));

    let outcome = h.gate.invoke(&agent(), "deploy", json!({"target": "prod"})).await;

    assert_eq!(outcome.denial(), Some(DenialReason::ApprovalMisconfigured));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        h.gate.validate(),
        Err(GateError::ApprovalMisconfigured { tool }) if tool == "deploy"
    ));
    // Tools outside the approval set still work
    assert!(h.gate.invoke(&agent(), "read_file", json!({})).await.is_success());
}

#[test]
fn test_build_strict_rejects_missing_adjudicator() {
    let result = ToolCallGate::builder(ToolRegistry::new())
        .allowed_tools(["deploy"])
        .approval_required(["deploy"])
        .build_strict();
    assert!(matches!(result, Err(GateError::ApprovalMisconfigured { .. })));

    let result = ToolCallGate::builder(ToolRegistry::new())
        .approval_required(["deploy"])
        .adjudicator(StaticAdjudicator::approve_all())
        .build_strict();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_execution_failure_counts_once_and_keeps_error() {
    let h = harness(|b| b.allowed_tools(["write_file"]));

    let outcome = h.gate.invoke(&agent(), "write_file", json!({"path": "/tmp/x"})).await;

    assert_eq!(h.gate.breaker().consecutive_failures(), 1);
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.tool(), "write_file");
    assert!(failure.error().downcast_ref::<DiskFull>().is_some());

    let event = h.audit.last().unwrap();
    assert_eq!(event.status(), AuditStatus::Failed);
    assert_eq!(event.outcome.error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_call_propagates_execution_error() {
    let h = harness(|b| b.allowed_tools(["write_file"]));

    let err = h.gate.call(&agent(), "write_file", json!({})).await.unwrap_err();

    match err {
        GateError::ExecutionFailed { tool, source } => {
            assert_eq!(tool, "write_file");
            assert!(source.downcast_ref::<DiskFull>().is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let h = harness(|b| b.allowed_tools(["x"]));

    h.gate.invoke(&agent(), "x", json!({"fail": true})).await;
    h.gate.invoke(&agent(), "x", json!({"fail": true})).await;
    assert_eq!(h.gate.breaker().consecutive_failures(), 2);

    assert!(h.gate.invoke(&agent(), "x", json!({})).await.is_success());
    assert_eq!(h.gate.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_trial_call_closes_breaker() {
    let h = harness(|b| {
        b.allowed_tools(["x"]).breaker_config(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(30)),
        )
    });

    h.gate.invoke(&agent(), "x", json!({"fail": true})).await;
    assert_eq!(h.gate.breaker().state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.gate.invoke(&agent(), "x", json!({})).await.is_success());
    assert_eq!(h.gate.breaker().state(), CircuitState::Closed);
    assert_eq!(h.audit.last().unwrap().breaker_state_after, CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_trial_reopens_breaker() {
    let h = harness(|b| {
        b.allowed_tools(["x"]).breaker_config(
            CircuitBreakerConfig::default()
                .with_failure_threshold(5)
                .with_recovery_timeout(Duration::from_millis(30)),
        )
    });

    for _ in 0..5 {
        h.gate.invoke(&agent(), "x", json!({"fail": true})).await;
    }
    assert_eq!(h.gate.breaker().state(), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = h.gate.invoke(&agent(), "x", json!({"fail": true})).await;

    assert!(outcome.is_failed());
    assert_eq!(h.gate.breaker().state(), CircuitState::Open);
    assert!(h.gate.breaker().opened_at().is_some());
}

#[tokio::test]
async fn test_denied_trial_gives_permit_back() {
    let h = harness(|b| {
        b.allowed_tools(["x"]).breaker_config(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(30)),
        )
    });

    h.gate.invoke(&agent(), "x", json!({"fail": true})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The trial slot goes to a call that is then refused by policy
    let outcome = h.gate.invoke(&agent(), "read_file", json!({})).await;
    assert_eq!(outcome.denial(), Some(DenialReason::NotAuthorized));
    assert_eq!(h.gate.breaker().state(), CircuitState::HalfOpen);
    assert!(!h.gate.breaker().trial_in_flight());

    assert!(h.gate.invoke(&agent(), "x", json!({})).await.is_success());
    assert_eq!(h.gate.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_is_a_failure() {
    let h = harness(|b| b.allowed_tools(["slow"]).execution_timeout(Duration::from_secs(1)));

    let outcome = h.gate.invoke(&agent(), "slow", json!({})).await;

    let failure = outcome.failure().unwrap();
    let timeout = failure.error().downcast_ref::<ExecutionTimeout>().unwrap();
    assert_eq!(timeout.limit, Duration::from_secs(1));
    assert_eq!(h.gate.breaker().consecutive_failures(), 1);
}

#[tokio::test]
async fn test_panicking_tool_is_a_failure() {
    let h = harness(|b| {
        b.allowed_tools(["*"])
            .breaker_config(CircuitBreakerConfig::default().with_failure_threshold(1))
    });

    let outcome = h.gate.invoke(&agent(), "panics", json!({})).await;

    let failure = outcome.failure().unwrap();
    let panicked = failure.error().downcast_ref::<ExecutionPanicked>().unwrap();
    assert_eq!(panicked.tool, "panics");
    assert_eq!(panicked.message, "index out of range");
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gate.breaker().state(), CircuitState::Open);

    assert_eq!(h.audit.len(), 1);
    let event = h.audit.last().unwrap();
    assert_eq!(event.status(), AuditStatus::Failed);
    assert_eq!(event.breaker_state_after, CircuitState::Open);
}

#[tokio::test]
async fn test_dropped_call_is_audited_as_cancelled() {
    let (adjudicator, mut inbox) = approval_channel(4);
    let resolver = inbox.resolver();
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(adjudicator)
    });

    let gate = Arc::clone(&h.gate);
    let pending = tokio::spawn(async move {
        gate.invoke(&agent(), "deploy", json!({"target": "prod"})).await
    });

    let prompt = inbox.next().await.unwrap();
    assert!(h.audit.is_empty());
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert_eq!(resolver.pending_count(), 0);
    assert!(!resolver.resolve(prompt.request_id, true));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    assert_eq!(h.audit.len(), 1);
    let event = h.audit.last().unwrap();
    assert_eq!(event.status(), AuditStatus::Denied);
    assert_eq!(event.outcome.reason.as_deref(), Some("cancelled"));
    assert_eq!(event.tool_name, "deploy");
    assert_eq!(event.agent_id, "agent-1");
}

#[tokio::test]
async fn test_cancelled_before_approval() {
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(StaticAdjudicator::approve_all())
    });
    let token = CancellationToken::new();
    token.cancel();
    let ctx = CallContext::new().with_cancellation(token);

    let outcome = h.gate.invoke_with(&agent(), "deploy", json!({}), &ctx).await;

    assert_eq!(outcome.denial(), Some(DenialReason::Cancelled));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_while_awaiting_operator() {
    let (adjudicator, mut inbox) = approval_channel(4);
    let resolver = inbox.resolver();
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(adjudicator)
    });
    let token = CancellationToken::new();
    let ctx = CallContext::new()
        .with_cancellation(token.clone())
        .with_trace_id("trace-42");

    let gate = Arc::clone(&h.gate);
    let pending = tokio::spawn(async move {
        gate.invoke_with(&agent(), "deploy", json!({"target": "prod"}), &ctx)
            .await
    });

    let prompt = inbox.next().await.unwrap();
    assert_eq!(prompt.tool_name, "deploy");
    assert_eq!(resolver.pending_count(), 1);
    token.cancel();

    let outcome = pending.await.unwrap();
    assert_eq!(outcome.denial(), Some(DenialReason::Cancelled));
    assert_eq!(h.gate.breaker().consecutive_failures(), 0);
    assert_eq!(h.gate.breaker().state(), CircuitState::Closed);
    assert_eq!(resolver.pending_count(), 0);

    let event = h.audit.last().unwrap();
    assert_eq!(event.outcome.reason.as_deref(), Some("cancelled"));
    assert_eq!(event.trace_id.as_deref(), Some("trace-42"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_approval_does_not_stall_other_calls() {
    let (adjudicator, mut inbox) = approval_channel(4);
    let resolver = inbox.resolver();
    let h = harness(|b| {
        b.allowed_tools(["deploy", "read_file"])
            .approval_required(["deploy"])
            .adjudicator(adjudicator)
    });

    let gate = Arc::clone(&h.gate);
    let deploy =
        tokio::spawn(async move { gate.invoke(&agent(), "deploy", json!({"target": "prod"})).await });
    let prompt = inbox.next().await.unwrap();

    // While the operator thinks, other calls go through
    for _ in 0..10 {
        assert!(h.gate.invoke(&agent(), "read_file", json!({})).await.is_success());
    }

    assert!(resolver.resolve(prompt.request_id, true));
    assert!(deploy.await.unwrap().is_success());
    assert_eq!(h.audit.len(), 11);
}

#[tokio::test]
async fn test_arguments_are_redacted_for_operator_and_audit() {
    let h = harness(|b| {
        b.allowed_tools(["deploy"])
            .approval_required(["deploy"])
            .adjudicator(FnAdjudicator::new(|_: &str, args: &Value| {
                args["api_key"] == REDACTED && args["target"] == "prod"
            }))
    });
    let args = json!({"target": "prod", "api_key": "sk-live-123"});

    let outcome = h.gate.invoke(&agent(), "deploy", args.clone()).await;

    assert!(outcome.is_success());
    let event = h.audit.last().unwrap();
    assert_eq!(event.arguments["api_key"], REDACTED);
    assert_eq!(event.args_hash, args_hash(&args));
}

#[tokio::test]
async fn test_audit_failure_never_fails_the_call() {
    let gate = ToolCallGate::builder(registry(Arc::new(AtomicUsize::new(0))))
        .allowed_tools(["read_file"])
        .audit_sink(BrokenSink)
        .build();

    assert!(gate.invoke(&agent(), "read_file", json!({})).await.is_success());
}

#[tokio::test]
async fn test_grant_skill_at_runtime() {
    let h = harness(|b| b.allowed_tools(["read_file"]));
    let skill = SkillManifest::from_yaml_str(
        "name: deployer\nversion: '1.0'\ndescription: Ship it\npermissions: [deploy]\n",
    )
    .unwrap();

    let before = h.gate.invoke(&agent(), "deploy", json!({})).await;
    assert_eq!(before.denial(), Some(DenialReason::NotAuthorized));

    assert_eq!(h.gate.grant_skill(&skill), 1);
    assert_eq!(h.gate.grant_skill(&skill), 0);
    assert!(h.gate.invoke(&agent(), "deploy", json!({})).await.is_success());
    assert!(h.gate.policy().authorize("read_file").is_authorized());
}

#[tokio::test]
async fn test_every_invoke_emits_exactly_one_event() {
    let h = harness(|b| b.allowed_tools(["read_file", "write_file"]));
    let attempts = [
        ("read_file", AuditStatus::Success),
        ("write_file", AuditStatus::Failed),
        ("deploy", AuditStatus::Denied),
        ("missing", AuditStatus::Denied),
    ];
    for (tool, _) in &attempts {
        h.gate.invoke(&agent(), tool, json!({})).await;
    }

    let events = h.audit.events();
    assert_eq!(events.len(), attempts.len());
    for (event, (tool, status)) in events.iter().zip(&attempts) {
        assert_eq!(event.tool_name, *tool);
        assert_eq!(event.status(), *status);
    }
}

#[tokio::test]
async fn test_bound_gate_uses_its_identity() {
    let identity = AgentIdentity::builder()
        .id("external-7")
        .permissions(["read_file", "*"])
        .build();
    let h = harness(|b| b.policy_from_identity(&identity).breaker_config(CircuitBreakerConfig::sensitive()));
    let bound = Arc::clone(&h.gate).bind(identity);

    assert_eq!(bound.allowed_tool_names(), vec!["read_file"]);
    assert_eq!(bound.call("read_file", json!({})).await.unwrap()["contents"], "hello");
    assert_eq!(h.audit.last().unwrap().agent_id, "external-7");
    assert_eq!(bound.gate().breaker().config().failure_threshold, 2);
}

#[tokio::test]
async fn test_builder_from_config() {
    let config = crate::config::GateConfig::from_toml_str(
        r#"
allowed_tools = ["read_file", "deploy"]

[breaker]
failure_threshold = 4

[approval]
required = ["deploy"]
"#,
    )
    .unwrap();

    let gate = GateBuilder::from_config(ToolRegistry::new(), &config)
        .unwrap()
        .adjudicator(StaticAdjudicator::approve_all())
        .build_strict()
        .unwrap();

    assert_eq!(gate.breaker().config().failure_threshold, 4);
    assert!(gate.policy().requires_approval("deploy"));
    assert!(gate.policy().authorize("read_file").is_authorized());
    assert!(!gate.policy().authorize("write_file").is_authorized());
}
