/// Resilience engine: the per-operation state machine
///
/// ```text
///              ┌──────────── success ───────────────→ SUCCEEDED
///              │
///  ATTEMPTING ─┼── retryable, attempts left ──→ WAITING_RETRY ──→ ATTEMPTING
///      ↑       │
///      │       └── otherwise ──→ RECOVERING ──┬── strategy ok ──→ ATTEMPTING (once)
///      │                                      │
///      └──────────────────────────────────────┘
///                                             └── exhausted ──→ FALLBACK ──┬─→ DEGRADED
///                                                                          └─→ FAILED
/// ```
///
/// Every transition appends one [`ReportEntry`] and emits one [`AuditEvent`].
/// An operation that succeeds on its first attempt seals an empty report.
/// Cancellation and the overall deadline are checked before each attempt and
/// raced against each suspension (retry wait, strategy, fallback).
use super::archive::ReportArchive;
use super::audit::{AuditEvent, AuditSink, TracingAuditSink};
use super::classification::{ClassifiedError, ErrorClassifier, ErrorKind};
use super::collaborators::Collaborators;
use super::context::OperationContext;
use super::fallback::{
    DegradedResult, FallbackActivation, FallbackMode, FallbackRegistry, FallbackStats,
    LocalQueueFallback, MinimalMetadataFallback, SandboxFallback,
};
use super::report::{EngineState, EntryAction, EntryOutcome, ErrorReport, Outcome, ReportEntry};
use super::retry::RetryController;
use super::store::{ReportStore, Statistics};
use super::strategies::{
    ConnectivityRecheck, CredentialRegeneration, DependencyResolution, MetadataCorrection,
    RecoveryLedger, RecoveryStrategy, StrategyRegistry, StrategyStats, UpstreamHealthRecheck,
};
use crate::config::{ConfigError, EngineConfig};
use crate::RegistryError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Caller veto consulted before every retry; `false` skips remaining retries
pub type RetryPredicate = Arc<dyn Fn(&ClassifiedError, &OperationContext) -> bool + Send + Sync>;

/// Non-failed terminal outcome of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Succeeded(T),

    /// Completed through a fallback with reduced functionality
    Degraded(DegradedResult),
}

impl<T> Completion<T> {
    pub fn outcome(&self) -> Outcome {
        match self {
            Completion::Succeeded(_) => Outcome::Succeeded,
            Completion::Degraded(_) => Outcome::Degraded,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Completion::Succeeded(value) => Some(value),
            Completion::Degraded(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Completion::Succeeded(value) => Some(value),
            Completion::Degraded(_) => None,
        }
    }

    pub fn degraded(&self) -> Option<&DegradedResult> {
        match self {
            Completion::Succeeded(_) => None,
            Completion::Degraded(result) => Some(result),
        }
    }
}

/// FAILED terminal outcome
///
/// Cancellation ends with kind `Cancelled`. An expired deadline is its own
/// cancellation kind, `DeadlineExceeded`, so callers can tell a caller abort
/// from running out of time. Both report `is_cancellation()`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct OperationFailed {
    pub operation_id: String,

    /// The error that decided the outcome
    pub error: ClassifiedError,

    /// User-facing message
    pub message: String,
}

impl OperationFailed {
    fn new(operation_id: impl Into<String>, error: ClassifiedError) -> Self {
        Self {
            operation_id: operation_id.into(),
            message: error.message.clone(),
            error,
        }
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::Failed
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    /// Whether the run was cut short by cancellation or the deadline
    pub fn is_cancellation(&self) -> bool {
        self.error.is_cancellation()
    }
}

/// Where the state machine goes next
enum Phase {
    Attempt,
    Recover(ClassifiedError),
    Fallback(ClassifiedError),
}

/// Removes the operation id from the in-flight set when the run ends
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    operation_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.operation_id);
    }
}

pub struct ResilienceEngine {
    config: EngineConfig,
    classifier: ErrorClassifier,
    retry: RetryController,
    strategies: StrategyRegistry,
    fallbacks: FallbackRegistry,
    store: ReportStore,
    archive: Option<Arc<ReportArchive>>,
    audit: Arc<dyn AuditSink>,
    retry_predicate: Option<RetryPredicate>,
    in_flight: Mutex<HashSet<String>>,
}

impl ResilienceEngine {
    pub fn builder() -> ResilienceEngineBuilder {
        ResilienceEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `operation` under retry, recovery and fallback
    ///
    /// The operation may be called several times and must be idempotent or
    /// otherwise safe to repeat.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: OperationContext,
        operation: F,
    ) -> Result<Completion<T>, OperationFailed>
    where
        F: FnMut(&OperationContext) -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let predicate = self.retry_predicate.clone();
        self.execute_with(ctx, operation, move |error, ctx| {
            predicate.as_ref().map_or(true, |p| p(error, ctx))
        })
        .await
    }

    /// Like [`execute`](Self::execute) with a per-call retry veto
    pub async fn execute_with<T, F, Fut, P>(
        &self,
        mut ctx: OperationContext,
        mut operation: F,
        should_retry: P,
    ) -> Result<Completion<T>, OperationFailed>
    where
        F: FnMut(&OperationContext) -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
        P: Fn(&ClassifiedError, &OperationContext) -> bool,
    {
        let Some(_claim) = self.claim(&ctx.operation_id) else {
            tracing::warn!(
                operation_id = %ctx.operation_id,
                "Rejecting operation id that is in flight or already reported"
            );
            let error = ClassifiedError::duplicate_operation(&ctx.operation_id);
            return Err(OperationFailed::new(ctx.operation_id, error));
        };

        let mut report = ErrorReport::open(&ctx.operation_id, &ctx.actor);
        let mut ledger = RecoveryLedger::new();
        let mut post_recovery = false;
        let mut phase = Phase::Attempt;

        tracing::debug!(
            operation_id = %ctx.operation_id,
            actor = %ctx.actor,
            max_attempts = self.retry.max_attempts(&ctx),
            "Starting operation"
        );

        loop {
            phase = match phase {
                Phase::Attempt => {
                    if let Some(interrupt) = self.interruption(&ctx) {
                        let state = EngineState::Attempting;
                        return Err(self.interrupt(&ctx, report, state, EntryAction::Attempt, interrupt));
                    }

                    ctx.attempt += 1;
                    let raw = match self.attempt(&mut operation, &ctx).await {
                        Ok(value) => {
                            if !report.entries.is_empty() {
                                self.record(
                                    &ctx,
                                    &mut report,
                                    self.entry(
                                        &ctx,
                                        EngineState::Attempting,
                                        EngineState::Succeeded,
                                        EntryAction::Attempt,
                                        EntryOutcome::Succeeded,
                                    ),
                                );
                                tracing::info!(
                                    operation_id = %ctx.operation_id,
                                    attempt = ctx.attempt,
                                    "Operation succeeded after earlier failures"
                                );
                            }
                            self.seal(report, Outcome::Succeeded);
                            return Ok(Completion::Succeeded(value));
                        }
                        Err(raw) => raw,
                    };

                    let error = self.classifier.classify(&raw);
                    tracing::warn!(
                        operation_id = %ctx.operation_id,
                        attempt = ctx.attempt,
                        kind = %error.kind,
                        category = %error.category,
                        error = %raw,
                        "Operation attempt failed"
                    );

                    if post_recovery {
                        let entry = self
                            .entry(
                                &ctx,
                                EngineState::Attempting,
                                EngineState::Fallback,
                                EntryAction::Attempt,
                                EntryOutcome::Failed,
                            )
                            .with_error(error.clone())
                            .with_note("attempt after recovery failed");
                        self.record(&ctx, &mut report, entry);
                        Phase::Fallback(error)
                    } else if self
                        .retry
                        .should_retry(&ctx, &error, |e, c| should_retry(e, c))
                    {
                        let delay = self.retry.next_delay(ctx.attempt);
                        let entry = self
                            .entry(
                                &ctx,
                                EngineState::Attempting,
                                EngineState::WaitingRetry,
                                EntryAction::Attempt,
                                EntryOutcome::Failed,
                            )
                            .with_error(error)
                            .with_retry_delay(delay);
                        self.record(&ctx, &mut report, entry);

                        tracing::debug!(
                            operation_id = %ctx.operation_id,
                            attempt = ctx.attempt,
                            delay = %humantime::format_duration(delay),
                            "Scheduling retry"
                        );

                        let waited = match self.interruption(&ctx) {
                            Some(interrupt) => Err(interrupt),
                            None => self.suspend(&ctx, tokio::time::sleep(delay)).await,
                        };
                        if let Err(interrupt) = waited {
                            let state = EngineState::WaitingRetry;
                            return Err(self.interrupt(&ctx, report, state, EntryAction::Attempt, interrupt));
                        }
                        Phase::Attempt
                    } else {
                        let entry = self
                            .entry(
                                &ctx,
                                EngineState::Attempting,
                                EngineState::Recovering,
                                EntryAction::Attempt,
                                EntryOutcome::Failed,
                            )
                            .with_error(error.clone());
                        self.record(&ctx, &mut report, entry);
                        Phase::Recover(error)
                    }
                }

                Phase::Recover(error) => {
                    let no_strategy = EntryAction::Recovery { strategy_id: None };

                    if !error.recoverable {
                        let entry = self
                            .entry(
                                &ctx,
                                EngineState::Recovering,
                                EngineState::Fallback,
                                no_strategy,
                                EntryOutcome::Skipped,
                            )
                            .with_note(format!("{} errors are not recoverable", error.kind));
                        self.record(&ctx, &mut report, entry);
                        Phase::Fallback(error)
                    } else {
                        let applied = match self.interruption(&ctx) {
                            Some(interrupt) => Err(interrupt),
                            None => {
                                self.suspend(
                                    &ctx,
                                    self.strategies.select_and_apply(&ctx, &error, &mut ledger),
                                )
                                .await
                            }
                        };

                        match applied {
                            Err(interrupt) => {
                                let state = EngineState::Recovering;
                                return Err(self.interrupt(&ctx, report, state, no_strategy, interrupt));
                            }
                            Ok(None) => {
                                let note = if ledger.total() == 0 {
                                    "no recovery strategy applies"
                                } else {
                                    "recovery strategies exhausted"
                                };
                                let entry = self
                                    .entry(
                                        &ctx,
                                        EngineState::Recovering,
                                        EngineState::Fallback,
                                        no_strategy,
                                        EntryOutcome::Skipped,
                                    )
                                    .with_note(note);
                                self.record(&ctx, &mut report, entry);
                                Phase::Fallback(error)
                            }
                            Ok(Some(attempt)) if attempt.succeeded => {
                                ctx.metadata.extend(attempt.metadata);
                                let entry = self
                                    .entry(
                                        &ctx,
                                        EngineState::Recovering,
                                        EngineState::Attempting,
                                        EntryAction::Recovery {
                                            strategy_id: Some(attempt.strategy_id.clone()),
                                        },
                                        EntryOutcome::Succeeded,
                                    )
                                    .with_note(attempt.detail);
                                self.record(&ctx, &mut report, entry);

                                tracing::info!(
                                    operation_id = %ctx.operation_id,
                                    strategy = %attempt.strategy_id,
                                    kind = %error.kind,
                                    "Recovery succeeded, attempting operation again"
                                );
                                post_recovery = true;
                                Phase::Attempt
                            }
                            Ok(Some(attempt)) => {
                                let entry = self
                                    .entry(
                                        &ctx,
                                        EngineState::Recovering,
                                        EngineState::Recovering,
                                        EntryAction::Recovery {
                                            strategy_id: Some(attempt.strategy_id),
                                        },
                                        EntryOutcome::Failed,
                                    )
                                    .with_error(error.clone())
                                    .with_note(attempt.detail);
                                self.record(&ctx, &mut report, entry);
                                Phase::Recover(error)
                            }
                        }
                    }
                }

                Phase::Fallback(error) => {
                    let no_fallback = EntryAction::Fallback { fallback_id: None };

                    let activated = match self.interruption(&ctx) {
                        Some(interrupt) => Err(interrupt),
                        None => {
                            self.suspend(&ctx, self.fallbacks.select_and_activate(&ctx, &error))
                                .await
                        }
                    };

                    match activated {
                        Err(interrupt) => {
                            let state = EngineState::Fallback;
                            return Err(self.interrupt(&ctx, report, state, no_fallback, interrupt));
                        }
                        Ok(FallbackActivation::NotApplicable) => {
                            let entry = self
                                .entry(
                                    &ctx,
                                    EngineState::Fallback,
                                    EngineState::Failed,
                                    no_fallback,
                                    EntryOutcome::Skipped,
                                )
                                .with_error(error.clone())
                                .with_note(format!("no fallback covers {} errors", error.kind));
                            self.record(&ctx, &mut report, entry);
                            return Err(self.fail(&ctx, report, error));
                        }
                        Ok(FallbackActivation::Activated(result)) => {
                            let entry = self
                                .entry(
                                    &ctx,
                                    EngineState::Fallback,
                                    EngineState::Degraded,
                                    EntryAction::Fallback {
                                        fallback_id: Some(result.fallback_id.clone()),
                                    },
                                    EntryOutcome::Succeeded,
                                )
                                .with_note(result.description.clone());
                            self.record(&ctx, &mut report, entry);

                            tracing::warn!(
                                operation_id = %ctx.operation_id,
                                fallback = %result.fallback_id,
                                kind = %error.kind,
                                category = %error.category,
                                "Operation completed in degraded mode"
                            );
                            self.seal(report, Outcome::Degraded);
                            return Ok(Completion::Degraded(result));
                        }
                        Ok(FallbackActivation::Failed {
                            fallback_id,
                            reason,
                        }) => {
                            let entry = self
                                .entry(
                                    &ctx,
                                    EngineState::Fallback,
                                    EngineState::Failed,
                                    EntryAction::Fallback {
                                        fallback_id: Some(fallback_id),
                                    },
                                    EntryOutcome::Failed,
                                )
                                .with_error(error.clone())
                                .with_note(reason);
                            self.record(&ctx, &mut report, entry);
                            return Err(self.fail(&ctx, report, error));
                        }
                    }
                }
            };
        }
    }

    /// One call of the operation under the per-attempt timeout and the deadline
    async fn attempt<T, F, Fut>(
        &self,
        operation: &mut F,
        ctx: &OperationContext,
    ) -> Result<T, RegistryError>
    where
        F: FnMut(&OperationContext) -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let call = operation(ctx);
        let limit = match (self.config.attempt_timeout, ctx.remaining()) {
            (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
            (timeout, remaining) => timeout.or(remaining),
        };

        let Some(limit) = limit else {
            return call.await;
        };

        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(format!(
                "attempt {} did not finish within {}",
                ctx.attempt,
                humantime::format_duration(limit)
            ))),
        }
    }

    /// Race a suspension against cancellation and the deadline
    async fn suspend<F: Future>(
        &self,
        ctx: &OperationContext,
        suspension: F,
    ) -> Result<F::Output, ClassifiedError> {
        let deadline = async {
            match ctx.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled(self.config.poll_interval) => {
                Err(ClassifiedError::cancelled("cancellation requested"))
            }
            _ = deadline => Err(ClassifiedError::deadline_exceeded()),
            output = suspension => Ok(output),
        }
    }

    fn interruption(&self, ctx: &OperationContext) -> Option<ClassifiedError> {
        if ctx.is_cancelled() {
            Some(ClassifiedError::cancelled("cancellation requested"))
        } else if ctx.deadline_passed() {
            Some(ClassifiedError::deadline_exceeded())
        } else {
            None
        }
    }

    fn entry(
        &self,
        ctx: &OperationContext,
        from: EngineState,
        to: EngineState,
        action: EntryAction,
        outcome: EntryOutcome,
    ) -> ReportEntry {
        ReportEntry::new(ctx.attempt, from, to, action, outcome)
    }

    /// Append an entry and emit the matching audit event
    fn record(&self, ctx: &OperationContext, report: &mut ErrorReport, entry: ReportEntry) {
        self.audit.record(AuditEvent {
            operation_id: ctx.operation_id.clone(),
            actor: ctx.actor.clone(),
            timestamp: entry.timestamp,
            attempt: entry.attempt,
            from: entry.from,
            to: entry.to,
            detail: entry.action.to_string(),
            error_kind: entry.error.as_ref().map(|e| e.kind),
        });
        report.append(entry);
    }

    /// End the run after cancellation or deadline expiry
    fn interrupt(
        &self,
        ctx: &OperationContext,
        mut report: ErrorReport,
        from: EngineState,
        action: EntryAction,
        error: ClassifiedError,
    ) -> OperationFailed {
        let entry = self
            .entry(ctx, from, EngineState::Failed, action, EntryOutcome::Cancelled)
            .with_error(error.clone());
        self.record(ctx, &mut report, entry);
        self.fail(ctx, report, error)
    }

    fn fail(
        &self,
        ctx: &OperationContext,
        report: ErrorReport,
        error: ClassifiedError,
    ) -> OperationFailed {
        tracing::error!(
            operation_id = %ctx.operation_id,
            attempt = ctx.attempt,
            kind = %error.kind,
            category = %error.category,
            severity = %error.severity,
            "Operation failed"
        );
        self.seal(report, Outcome::Failed);
        OperationFailed::new(ctx.operation_id.clone(), error)
    }

    fn seal(&self, mut report: ErrorReport, outcome: Outcome) {
        report.seal(outcome);

        match self.store.seal(report) {
            Ok(sealed) => {
                if let Some(archive) = &self.archive {
                    if let Err(e) = archive.save(&sealed) {
                        tracing::warn!(
                            operation_id = %sealed.operation_id,
                            error = %format!("{:#}", e),
                            "Failed to archive report"
                        );
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to seal report"),
        }
    }

    fn claim(&self, operation_id: &str) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(operation_id) || self.store.contains(operation_id) {
            return None;
        }
        in_flight.insert(operation_id.to_string());

        Some(InFlightGuard {
            in_flight: &self.in_flight,
            operation_id: operation_id.to_string(),
        })
    }

    /// Sealed report of an operation, if still retained
    pub fn report(&self, operation_id: &str) -> Option<Arc<ErrorReport>> {
        self.store.get(operation_id)
    }

    /// Up to `limit` sealed reports, newest first
    pub fn recent_reports(&self, limit: usize) -> Vec<Arc<ErrorReport>> {
        self.store.recent(limit)
    }

    /// Statistics over reports sealed within `window` (all when `None`)
    pub fn statistics(&self, window: Option<Duration>) -> Statistics {
        self.store.aggregate(window)
    }

    pub fn strategy_stats(&self) -> Vec<StrategyStats> {
        self.strategies.stats()
    }

    pub fn fallback_stats(&self) -> Vec<FallbackStats> {
        self.fallbacks.stats()
    }

    /// Apply the retention policy to the report store now
    pub fn enforce_retention(&self) -> usize {
        self.store.enforce_retention()
    }

    /// Number of operations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn archive(&self) -> Option<&Arc<ReportArchive>> {
        self.archive.as_ref()
    }
}

impl std::fmt::Debug for ResilienceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceEngine")
            .field("config", &self.config)
            .field("strategies", &self.strategies)
            .field("fallbacks", &self.fallbacks)
            .field("store", &self.store)
            .field("archive", &self.archive)
            .finish()
    }
}

/// Builder for [`ResilienceEngine`]
///
/// Built-in strategies are registered ahead of strategies added with
/// [`strategy`](Self::strategy); fallbacks keep their call order.
#[derive(Default)]
pub struct ResilienceEngineBuilder {
    config: EngineConfig,
    classifier: Option<ErrorClassifier>,
    builtin_strategies: Option<Collaborators>,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    fallbacks: Vec<Arc<dyn FallbackMode>>,
    audit: Option<Arc<dyn AuditSink>>,
    archive: Option<Arc<ReportArchive>>,
    retry_predicate: Option<RetryPredicate>,
}

impl ResilienceEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn FallbackMode>) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    /// Register the built-in strategies whose collaborators are present
    ///
    /// Metadata correction needs no collaborator and is always registered.
    /// Wait-and-recheck strategies settle for the configured base delay.
    pub fn with_builtin_strategies(mut self, collaborators: &Collaborators) -> Self {
        self.builtin_strategies = Some(collaborators.clone());
        self
    }

    /// Register the built-in fallbacks whose collaborators are present
    pub fn with_builtin_fallbacks(mut self, collaborators: &Collaborators) -> Self {
        if let Some(queue) = &collaborators.queue {
            self.fallbacks
                .push(Arc::new(LocalQueueFallback::new(Arc::clone(queue))));
        }
        if let Some(sandbox) = &collaborators.sandbox {
            self.fallbacks
                .push(Arc::new(SandboxFallback::new(Arc::clone(sandbox))));
        }
        if let Some(registrar) = &collaborators.minimal {
            self.fallbacks
                .push(Arc::new(MinimalMetadataFallback::new(Arc::clone(registrar))));
        }
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Write every sealed report through to `archive`
    pub fn archive(mut self, archive: Arc<ReportArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Default retry veto used by [`ResilienceEngine::execute`]
    pub fn retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    pub fn build(self) -> Result<ResilienceEngine, ConfigError> {
        self.config.validate()?;

        let mut strategies = StrategyRegistry::new(self.config.max_strategy_attempts);
        if let Some(collaborators) = &self.builtin_strategies {
            for strategy in builtin_strategies(collaborators, self.config.retry.base_delay) {
                strategies.register(strategy);
            }
        }
        for strategy in self.strategies {
            strategies.register(strategy);
        }

        let mut fallbacks = FallbackRegistry::new();
        for fallback in self.fallbacks {
            fallbacks.register(fallback);
        }

        tracing::debug!(
            strategies = ?strategies.ids(),
            fallbacks = ?fallbacks.ids(),
            max_attempts = self.config.retry.max_attempts,
            "Resilience engine ready"
        );

        Ok(ResilienceEngine {
            retry: RetryController::new(self.config.retry.clone()),
            store: ReportStore::new(
                self.config.retention.clone(),
                self.config.patterns.clone(),
            ),
            config: self.config,
            classifier: self.classifier.unwrap_or_default(),
            strategies,
            fallbacks,
            archive: self.archive,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            retry_predicate: self.retry_predicate,
            in_flight: Mutex::new(HashSet::new()),
        })
    }
}

fn builtin_strategies(
    collaborators: &Collaborators,
    recheck_delay: Duration,
) -> Vec<Arc<dyn RecoveryStrategy>> {
    let mut strategies: Vec<Arc<dyn RecoveryStrategy>> = Vec::new();

    if let Some(probe) = &collaborators.connectivity {
        strategies.push(Arc::new(
            ConnectivityRecheck::new(Arc::clone(probe)).with_recheck_delay(recheck_delay),
        ));
    }
    if let Some(probe) = &collaborators.health {
        strategies.push(Arc::new(
            UpstreamHealthRecheck::new(Arc::clone(probe)).with_recheck_delay(recheck_delay),
        ));
    }
    if let Some(regenerator) = &collaborators.credentials {
        strategies.push(Arc::new(CredentialRegeneration::new(Arc::clone(regenerator))));
    }
    if let Some(resolver) = &collaborators.dependencies {
        strategies.push(Arc::new(DependencyResolution::new(Arc::clone(resolver))));
    }
    strategies.push(Arc::new(MetadataCorrection::new()));

    strategies
}
