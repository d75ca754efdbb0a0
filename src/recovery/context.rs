/// Operation context and cooperative cancellation
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Shared cancellation flag
///
/// Clones observe the same flag. The engine checks it before every attempt and
/// races it against every suspension, polling at the configured interval.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Underlying atomic, e.g. for `signal_hook::flag::register`
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Resolve once the flag is raised, checking every `poll_interval`
    pub async fn cancelled(&self, poll_interval: Duration) {
        while !self.is_cancelled() {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Identity and mutable bookkeeping of one operation run
///
/// Created by the caller and handed to the engine by value; from then on only the
/// engine mutates it (attempt counter, metadata merged from recovery strategies).
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Unique operation identifier (UUID v4 unless supplied)
    pub operation_id: String,

    /// Identity on whose behalf the operation runs
    pub actor: String,

    /// Arbitrary metadata (module id, version, service...)
    pub metadata: BTreeMap<String, String>,

    /// Current attempt number, 0 before the first attempt
    pub attempt: u32,

    /// Attempts allowed before recovery; taken from the engine config when unset
    pub max_attempts: Option<u32>,

    /// Overall deadline for the whole run
    pub deadline: Option<Instant>,

    pub cancellation: CancellationFlag,
}

impl OperationContext {
    /// Create a context with a fresh operation id
    pub fn new(actor: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), actor)
    }

    /// Create a context with a caller-chosen operation id
    pub fn with_id(operation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            actor: actor.into(),
            metadata: BTreeMap::new(),
            attempt: 0,
            max_attempts: None,
            deadline: None,
            cancellation: CancellationFlag::new(),
        }
    }

    /// Add metadata to the context
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the engine's attempt cap for this operation
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Deadline relative to now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Share an existing cancellation flag (e.g. one wired to Ctrl+C)
    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = OperationContext::with_id("op-7", "alice")
            .with_metadata("module_id", "net/http")
            .with_metadata("version", "1.2.0")
            .with_max_attempts(5);

        assert_eq!(ctx.operation_id, "op-7");
        assert_eq!(ctx.actor, "alice");
        assert_eq!(ctx.metadata_value("module_id"), Some("net/http"));
        assert_eq!(ctx.max_attempts, Some(5));
        assert_eq!(ctx.attempt, 0);
        assert!(ctx.deadline.is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = OperationContext::new("bob");
        let b = OperationContext::new("bob");
        assert_ne!(a.operation_id, b.operation_id);
    }

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let ctx = OperationContext::new("carol").with_cancellation(flag.clone());
        assert!(!ctx.is_cancelled());

        flag.cancel();
        assert!(ctx.is_cancelled());
        assert!(flag.as_atomic().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_tracking() {
        let ctx = OperationContext::new("dave").with_timeout(Duration::from_secs(60));
        assert!(!ctx.deadline_passed());
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(60));

        let expired = OperationContext::new("dave").with_deadline(Instant::now());
        assert!(expired.deadline_passed());
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_after_flag() {
        let flag = CancellationFlag::new();
        let waiter = flag.clone();
        let handle =
            tokio::spawn(async move { waiter.cancelled(Duration::from_millis(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        flag.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }
}
