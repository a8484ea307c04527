use super::{AuditError, AuditEvent, AuditSink, AuditStatus};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Default sink: one structured log line per event at target `toolgate::audit`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let record = serde_json::to_string(&event)?;
        match event.status() {
            AuditStatus::Success => tracing::info!(
                target: "toolgate::audit",
                agent_id = %event.agent_id,
                tool = %event.tool_name,
                status = "success",
                %record
            ),
            AuditStatus::Denied | AuditStatus::Failed => tracing::warn!(
                target: "toolgate::audit",
                agent_id = %event.agent_id,
                tool = %event.tool_name,
                status = ?event.status(),
                %record
            ),
        }
        Ok(())
    }
}

/// Hands events to a bounded channel without waiting
///
/// A full channel drops the event and reports [`AuditError::Full`].
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver a consumer drains
    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (Self { sender }, receiver)
    }

    pub fn from_sender(sender: mpsc::Sender<AuditEvent>) -> Self {
        Self { sender }
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => AuditError::Full,
            mpsc::error::TrySendError::Closed(_) => AuditError::Closed,
        })
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn last(&self) -> Option<AuditEvent> {
        self.lock().last().cloned()
    }

    /// Remove and return all recorded events
    pub fn drain(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.lock().push(event);
        Ok(())
    }
}
