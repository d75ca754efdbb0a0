/// Audit trail of engine state transitions
///
/// Every transition recorded in a report is also emitted as an [`AuditEvent`].
/// Sinks are synchronous and must not block: the engine calls them inline.
use super::classification::ErrorKind;
use super::report::EngineState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One audited transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub operation_id: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub from: EngineState,
    pub to: EngineState,

    /// Action taken (`attempt`, `recovery:<id>`, `fallback:<id>`)
    pub detail: String,

    pub error_kind: Option<ErrorKind>,
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` event (default sink)
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "registry_resilience::audit",
            operation_id = %event.operation_id,
            actor = %event.actor,
            attempt = event.attempt,
            from = %event.from,
            to = %event.to,
            detail = %event.detail,
            error_kind = ?event.error_kind,
            "state transition"
        );
    }
}

/// Forwards events into a bounded channel; events are dropped when it is full
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "receiver dropped",
            };
            tracing::debug!(reason, "Dropping audit event");
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(attempt: u32) -> AuditEvent {
        AuditEvent {
            operation_id: "op-1".to_string(),
            actor: "alice".to_string(),
            timestamp: Utc::now(),
            attempt,
            from: EngineState::Attempting,
            to: EngineState::WaitingRetry,
            detail: "attempt".to_string(),
            error_kind: Some(ErrorKind::Network),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAuditSink::new(4);
        sink.record(event(1));
        sink.record(event(2));

        assert_eq!(rx.recv().await.map(|e| e.attempt), Some(1));
        assert_eq!(rx.recv().await.map(|e| e.attempt), Some(2));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelAuditSink::new(1);
        sink.record(event(1));
        sink.record(event(2));
        drop(sink);

        assert_eq!(rx.recv().await.map(|e| e.attempt), Some(1));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelAuditSink::new(1);
        drop(rx);
        sink.record(event(1));
    }
}
