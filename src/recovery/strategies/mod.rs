/// Recovery strategies and their registry
///
/// A strategy is an automated remediation attempted after retries of the
/// original operation are exhausted (or not applicable). Strategies are scoped
/// to an error category and ranked by historical success rate.
///
/// # Selection
///
/// Among strategies whose category matches and that are not used up for the
/// current operation, the one with the highest `successes / attempts` wins.
/// A strategy that has never run is ranked with an optimistic prior of 0.5 so
/// it gets tried at least once; ties go to the earlier registration. The
/// counters are plain atomics shared by all operations.
pub mod credentials;
pub mod dependency;
pub mod metadata;
pub mod wait_recheck;

pub use credentials::CredentialRegeneration;
pub use dependency::DependencyResolution;
pub use metadata::MetadataCorrection;
pub use wait_recheck::{ConnectivityRecheck, UpstreamHealthRecheck};

use super::classification::{ClassifiedError, ErrorCategory};
use super::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Success rate assumed for a strategy that has never been attempted
pub const OPTIMISTIC_PRIOR: f64 = 0.5;

/// Result of applying a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The condition behind the failure was remedied
    Recovered {
        detail: String,
        /// Merged into the operation context before the post-recovery attempt
        metadata: BTreeMap<String, String>,
    },

    /// The strategy ran but could not remedy the failure
    NotRecovered { reason: String },
}

impl RecoveryOutcome {
    pub fn recovered(detail: impl Into<String>) -> Self {
        RecoveryOutcome::Recovered {
            detail: detail.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn not_recovered(reason: impl Into<String>) -> Self {
        RecoveryOutcome::NotRecovered {
            reason: reason.into(),
        }
    }

    /// Attach a context metadata update (no-op on `NotRecovered`)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let RecoveryOutcome::Recovered { metadata, .. } = &mut self {
            metadata.insert(key.into(), value.into());
        }
        self
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered { .. })
    }
}

/// Automated remediation scoped to an error category
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Stable identifier used in reports and statistics
    fn id(&self) -> &str;

    /// Whether this strategy targets the category
    fn applies_to(&self, category: ErrorCategory) -> bool;

    /// Whether the strategy may be applied more than once per operation
    fn retryable_within_recovery(&self) -> bool {
        false
    }

    /// Attempt the remediation. An `Err` counts as a failed recovery.
    async fn apply(&self, ctx: &OperationContext, error: &ClassifiedError)
        -> Result<RecoveryOutcome>;
}

/// Registered strategy plus its shared counters
struct RegisteredStrategy {
    strategy: Arc<dyn RecoveryStrategy>,
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl RegisteredStrategy {
    fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return OPTIMISTIC_PRIOR;
        }
        let successes = self.successes.load(Ordering::Relaxed);
        successes as f64 / attempts as f64
    }
}

/// Per-operation record of which strategies were used
#[derive(Debug, Clone, Default)]
pub struct RecoveryLedger {
    uses: HashMap<String, u32>,
}

impl RecoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uses(&self, strategy_id: &str) -> u32 {
        self.uses.get(strategy_id).copied().unwrap_or(0)
    }

    fn record(&mut self, strategy_id: &str) {
        *self.uses.entry(strategy_id.to_string()).or_insert(0) += 1;
    }

    /// Total strategy applications for this operation
    pub fn total(&self) -> u32 {
        self.uses.values().sum()
    }
}

/// Result of one strategy application
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryAttempt {
    pub strategy_id: String,
    pub succeeded: bool,
    pub detail: String,
    pub metadata: BTreeMap<String, String>,
}

/// Point-in-time counters of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub id: String,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Ordered set of recovery strategies
pub struct StrategyRegistry {
    strategies: Vec<RegisteredStrategy>,

    /// Cap for strategies that are retryable within recovery
    max_strategy_attempts: u32,
}

impl StrategyRegistry {
    pub fn new(max_strategy_attempts: u32) -> Self {
        Self {
            strategies: Vec::new(),
            max_strategy_attempts: max_strategy_attempts.max(1),
        }
    }

    /// Register a strategy; registration order breaks ranking ties
    pub fn register(&mut self, strategy: Arc<dyn RecoveryStrategy>) {
        if self.strategies.iter().any(|s| s.strategy.id() == strategy.id()) {
            tracing::warn!(strategy = strategy.id(), "Replacing already registered strategy");
            self.strategies.retain(|s| s.strategy.id() != strategy.id());
        }

        self.strategies.push(RegisteredStrategy {
            strategy,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        });
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|s| s.strategy.id().to_string())
            .collect()
    }

    fn usage_cap(&self, strategy: &dyn RecoveryStrategy) -> u32 {
        if strategy.retryable_within_recovery() {
            self.max_strategy_attempts
        } else {
            1
        }
    }

    /// Best eligible strategy for this error and operation, if any
    fn select(&self, error: &ClassifiedError, ledger: &RecoveryLedger) -> Option<&RegisteredStrategy> {
        let mut best: Option<(&RegisteredStrategy, f64)> = None;

        for entry in &self.strategies {
            let strategy = entry.strategy.as_ref();
            if !strategy.applies_to(error.category) {
                continue;
            }
            if ledger.uses(strategy.id()) >= self.usage_cap(strategy) {
                continue;
            }

            let rate = entry.success_rate();
            // Strictly greater keeps the earliest registration on ties
            if best.map_or(true, |(_, best_rate)| rate > best_rate) {
                best = Some((entry, rate));
            }
        }

        best.map(|(entry, _)| entry)
    }

    /// Whether any strategy is still eligible for this error and operation
    pub fn has_candidate(&self, error: &ClassifiedError, ledger: &RecoveryLedger) -> bool {
        self.select(error, ledger).is_some()
    }

    /// Select the best eligible strategy and apply it
    ///
    /// Returns `None` when no strategy is eligible. A strategy returning an
    /// error is reported as a failed attempt, never propagated.
    pub async fn select_and_apply(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
        ledger: &mut RecoveryLedger,
    ) -> Option<RecoveryAttempt> {
        let entry = self.select(error, ledger)?;
        let strategy = entry.strategy.as_ref();
        let strategy_id = strategy.id().to_string();

        ledger.record(&strategy_id);
        entry.attempts.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            operation_id = %ctx.operation_id,
            strategy = %strategy_id,
            category = %error.category,
            success_rate = entry.success_rate(),
            "Applying recovery strategy"
        );

        let attempt = match strategy.apply(ctx, error).await {
            Ok(RecoveryOutcome::Recovered { detail, metadata }) => {
                entry.successes.fetch_add(1, Ordering::Relaxed);
                RecoveryAttempt {
                    strategy_id,
                    succeeded: true,
                    detail,
                    metadata,
                }
            }
            Ok(RecoveryOutcome::NotRecovered { reason }) => RecoveryAttempt {
                strategy_id,
                succeeded: false,
                detail: reason,
                metadata: BTreeMap::new(),
            },
            Err(e) => {
                tracing::warn!(
                    operation_id = %ctx.operation_id,
                    strategy = %strategy_id,
                    error = %format!("{:#}", e),
                    "Recovery strategy failed with an error"
                );
                RecoveryAttempt {
                    strategy_id,
                    succeeded: false,
                    detail: format!("{:#}", e),
                    metadata: BTreeMap::new(),
                }
            }
        };

        Some(attempt)
    }

    /// Counters of every registered strategy, in registration order
    pub fn stats(&self) -> Vec<StrategyStats> {
        self.strategies
            .iter()
            .map(|entry| StrategyStats {
                id: entry.strategy.id().to_string(),
                attempts: entry.attempts.load(Ordering::Relaxed),
                successes: entry.successes.load(Ordering::Relaxed),
                success_rate: entry.success_rate(),
            })
            .collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(2)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.ids())
            .field("max_strategy_attempts", &self.max_strategy_attempts)
            .finish()
    }
}
