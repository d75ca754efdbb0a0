/// Fallback modes: reduced-functionality completion paths
///
/// When an operation can neither be retried nor recovered, the engine may still
/// complete it in a degraded way (queue it locally, register it in a sandbox,
/// register it with fewer metadata fields). Each fallback decides which errors
/// it covers (by kind or category) and fallbacks are ranked by explicit priority, highest first; ties go to the earlier
/// registration. A fallback is activated at most once per operation.
pub mod builtin;

pub use builtin::{LocalQueueFallback, MinimalMetadataFallback, SandboxFallback};

use super::classification::ClassifiedError;
use super::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reduced-functionality completion path
#[async_trait]
pub trait FallbackMode: Send + Sync {
    fn id(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> u32;

    fn applies_to(&self, error: &ClassifiedError) -> bool;

    /// What functionality is lost when this fallback is used
    fn description(&self) -> &str;

    /// Complete the operation in degraded form; the value describes the result
    async fn activate(&self, ctx: &OperationContext, error: &ClassifiedError)
        -> Result<serde_json::Value>;
}

/// Payload of a DEGRADED outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedResult {
    pub fallback_id: String,

    /// Lost functionality, safe to show to end users
    pub description: String,

    /// Fallback-specific result (queue ticket, sandbox id...)
    pub data: serde_json::Value,

    /// The error that forced the fallback
    pub cause: ClassifiedError,
}

/// Result of `FallbackRegistry::select_and_activate`
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackActivation {
    /// No registered fallback covers the error's category
    NotApplicable,

    Activated(DegradedResult),

    Failed { fallback_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackStats {
    pub id: String,
    pub priority: u32,

    /// Successful activations
    pub activations: u64,

    pub failures: u64,
}

struct RegisteredFallback {
    mode: Arc<dyn FallbackMode>,
    activations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
pub struct FallbackRegistry {
    fallbacks: Vec<RegisteredFallback>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mode: Arc<dyn FallbackMode>) {
        if self.fallbacks.iter().any(|f| f.mode.id() == mode.id()) {
            tracing::warn!(fallback = mode.id(), "Replacing already registered fallback");
            self.fallbacks.retain(|f| f.mode.id() != mode.id());
        }

        self.fallbacks.push(RegisteredFallback {
            mode,
            activations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
    }

    pub fn len(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fallbacks.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.fallbacks
            .iter()
            .map(|f| f.mode.id().to_string())
            .collect()
    }

    fn select(&self, error: &ClassifiedError) -> Option<&RegisteredFallback> {
        let mut best: Option<&RegisteredFallback> = None;
        for entry in self.fallbacks.iter().filter(|f| f.mode.applies_to(error)) {
            if best.map_or(true, |b| entry.mode.priority() > b.mode.priority()) {
                best = Some(entry);
            }
        }
        best
    }

    /// Whether any fallback covers the error
    pub fn has_candidate(&self, error: &ClassifiedError) -> bool {
        self.select(error).is_some()
    }

    /// Activate the highest-priority fallback covering the error's category
    pub async fn select_and_activate(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
    ) -> FallbackActivation {
        let Some(entry) = self.select(error) else {
            return FallbackActivation::NotApplicable;
        };
        let mode = entry.mode.as_ref();

        tracing::info!(
            operation_id = %ctx.operation_id,
            fallback = mode.id(),
            priority = mode.priority(),
            category = %error.category,
            "Activating fallback mode"
        );

        match mode.activate(ctx, error).await {
            Ok(data) => {
                entry.activations.fetch_add(1, Ordering::Relaxed);
                FallbackActivation::Activated(DegradedResult {
                    fallback_id: mode.id().to_string(),
                    description: mode.description().to_string(),
                    data,
                    cause: error.clone(),
                })
            }
            Err(e) => {
                entry.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    operation_id = %ctx.operation_id,
                    fallback = mode.id(),
                    error = %format!("{:#}", e),
                    "Fallback activation failed"
                );
                FallbackActivation::Failed {
                    fallback_id: mode.id().to_string(),
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    pub fn stats(&self) -> Vec<FallbackStats> {
        self.fallbacks
            .iter()
            .map(|entry| FallbackStats {
                id: entry.mode.id().to_string(),
                priority: entry.mode.priority(),
                activations: entry.activations.load(Ordering::Relaxed),
                failures: entry.failures.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl std::fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field("fallbacks", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::{ErrorCategory, ErrorKind};

    struct Fixed {
        id: &'static str,
        priority: u32,
        category: ErrorCategory,
        fail: bool,
    }

    #[async_trait]
    impl FallbackMode for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn applies_to(&self, error: &ClassifiedError) -> bool {
            error.category == self.category
        }

        fn description(&self) -> &str {
            "reduced"
        }

        async fn activate(
            &self,
            _ctx: &OperationContext,
            _error: &ClassifiedError,
        ) -> Result<serde_json::Value> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            Ok(serde_json::json!({ "by": self.id }))
        }
    }

    fn fixed(id: &'static str, priority: u32, fail: bool) -> Arc<dyn FallbackMode> {
        Arc::new(Fixed {
            id,
            priority,
            category: ErrorCategory::Transient,
            fail,
        })
    }

    fn network() -> ClassifiedError {
        ClassifiedError::from_kind(ErrorKind::Network)
    }

    #[tokio::test]
    async fn test_highest_priority_wins() {
        let mut registry = FallbackRegistry::new();
        registry.register(fixed("low", 1, false));
        registry.register(fixed("high", 9, false));
        registry.register(fixed("also-high", 9, false));

        let ctx = OperationContext::new("test");
        match registry.select_and_activate(&ctx, &network()).await {
            FallbackActivation::Activated(result) => {
                assert_eq!(result.fallback_id, "high");
                assert_eq!(result.data["by"], "high");
                assert_eq!(result.cause.kind, ErrorKind::Network);
            }
            other => panic!("unexpected activation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_applicable() {
        let mut registry = FallbackRegistry::new();
        registry.register(fixed("queue", 1, false));

        let ctx = OperationContext::new("test");
        let error = ClassifiedError::from_kind(ErrorKind::Conflict);
        assert!(!registry.has_candidate(&error));
        assert_eq!(
            registry.select_and_activate(&ctx, &error).await,
            FallbackActivation::NotApplicable
        );
    }

    #[tokio::test]
    async fn test_failure_is_counted_and_reported() {
        let mut registry = FallbackRegistry::new();
        registry.register(fixed("queue", 1, true));

        let ctx = OperationContext::new("test");
        let activation = registry.select_and_activate(&ctx, &network()).await;
        assert_eq!(
            activation,
            FallbackActivation::Failed {
                fallback_id: "queue".to_string(),
                reason: "disk full".to_string(),
            }
        );

        let stats = &registry.stats()[0];
        assert_eq!((stats.activations, stats.failures), (0, 1));
    }
}
