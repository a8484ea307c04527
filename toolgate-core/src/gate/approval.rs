//! Human-in-the-loop approval
//!
//! An [`ApprovalAdjudicator`] answers one question: may this call run?
//! The gate awaits the answer without holding any of its own locks, so a
//! human taking minutes to respond never stalls other calls.
//!
//! [`approval_channel`] provides the request/reply flavour: prompts are
//! queued for an operator UI and answers are matched back by request id.
//! Every failure mode of that channel resolves to "denied".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// What the operator is asked to approve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Correlates the reply with this request
    pub request_id: Uuid,
    pub agent_id: String,
    pub tool_name: String,
    /// Arguments as shown to the operator (already redacted)
    pub arguments: Value,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(agent_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
            arguments,
            requested_at: Utc::now(),
        }
    }
}

/// Source of approve/deny verdicts for approval-required tools
#[async_trait]
pub trait ApprovalAdjudicator: Send + Sync {
    /// Return `true` to let the call run
    async fn decide(&self, request: &ApprovalRequest) -> bool;
}

/// Adjudicator backed by a synchronous `(tool_name, arguments) -> bool` callback
pub struct FnAdjudicator<F> {
    func: F,
}

impl<F> FnAdjudicator<F>
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ApprovalAdjudicator for FnAdjudicator<F>
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    async fn decide(&self, request: &ApprovalRequest) -> bool {
        (self.func)(&request.tool_name, &request.arguments)
    }
}

/// Adjudicator with a fixed answer, for tests and unattended runs
#[derive(Debug, Clone, Copy)]
pub struct StaticAdjudicator {
    approve: bool,
}

impl StaticAdjudicator {
    pub fn approve_all() -> Self {
        Self { approve: true }
    }

    pub fn deny_all() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalAdjudicator for StaticAdjudicator {
    async fn decide(&self, _request: &ApprovalRequest) -> bool {
        self.approve
    }
}

type PendingMap = Mutex<HashMap<Uuid, oneshot::Sender<bool>>>;

fn lock_pending(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<bool>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a queued approval channel
///
/// Returns the adjudicator to hand to a gate and the inbox an operator UI
/// drains. `buffer_size` bounds how many prompts may wait for the UI.
///
/// # Example
///
/// ```rust,ignore
/// let (adjudicator, mut inbox) = approval_channel(16);
/// let resolver = inbox.resolver();
///
/// tokio::spawn(async move {
///     while let Some(request) = inbox.next().await {
///         let approved = ask_operator(&request).await;
///         resolver.resolve(request.request_id, approved);
///     }
/// });
/// ```
pub fn approval_channel(buffer_size: usize) -> (QueuedAdjudicator, ApprovalInbox) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
    (
        QueuedAdjudicator {
            prompts: tx,
            pending: Arc::clone(&pending),
            timeout: None,
        },
        ApprovalInbox {
            prompts: rx,
            resolver: ApprovalResolver { pending },
        },
    )
}

/// Adjudicator that forwards requests to a remote operator and awaits the reply
#[derive(Clone)]
pub struct QueuedAdjudicator {
    prompts: mpsc::Sender<ApprovalRequest>,
    pending: Arc<PendingMap>,
    timeout: Option<Duration>,
}

impl QueuedAdjudicator {
    /// Deny automatically when no answer arrives within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl std::fmt::Debug for QueuedAdjudicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedAdjudicator")
            .field("pending", &lock_pending(&self.pending).len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Removes the pending entry when the waiting future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.request_id);
    }
}

#[async_trait]
impl ApprovalAdjudicator for QueuedAdjudicator {
    async fn decide(&self, request: &ApprovalRequest) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request.request_id, reply_tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: request.request_id,
        };

        if self.prompts.send(request.clone()).await.is_err() {
            tracing::warn!(
                request_id = %request.request_id,
                tool = %request.tool_name,
                "Approval inbox closed, denying"
            );
            return false;
        }

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        tool = %request.tool_name,
                        timeout = ?limit,
                        "Approval timed out, denying"
                    );
                    return false;
                }
            },
            None => reply_rx.await,
        };

        reply.unwrap_or_else(|_| {
            tracing::warn!(
                request_id = %request.request_id,
                tool = %request.tool_name,
                "Approval reply dropped, denying"
            );
            false
        })
    }
}

/// Operator side of an approval channel
pub struct ApprovalInbox {
    prompts: mpsc::Receiver<ApprovalRequest>,
    resolver: ApprovalResolver,
}

impl ApprovalInbox {
    /// Wait for the next approval prompt
    pub async fn next(&mut self) -> Option<ApprovalRequest> {
        self.prompts.recv().await
    }

    /// Take a prompt if one is already queued
    pub fn try_next(&mut self) -> Option<ApprovalRequest> {
        self.prompts.try_recv().ok()
    }

    /// Handle for delivering decisions, clonable across tasks
    pub fn resolver(&self) -> ApprovalResolver {
        self.resolver.clone()
    }
}

/// Delivers operator decisions back to waiting calls
#[derive(Clone)]
pub struct ApprovalResolver {
    pending: Arc<PendingMap>,
}

impl ApprovalResolver {
    /// Deliver a decision. Returns `false` when nothing is waiting on `request_id`
    /// (already answered, timed out, or cancelled).
    pub fn resolve(&self, request_id: Uuid, approved: bool) -> bool {
        let sender = lock_pending(&self.pending).remove(&request_id);
        match sender {
            Some(sender) => sender.send(approved).is_ok(),
            None => {
                tracing::debug!(%request_id, "No pending approval for reply");
                false
            }
        }
    }

    /// Number of requests still waiting for an answer
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

impl std::fmt::Debug for ApprovalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalResolver")
            .field("pending", &self.pending_count())
            .finish()
    }
}
