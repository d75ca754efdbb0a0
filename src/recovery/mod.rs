/// Operation resilience and recovery for registry operations
///
/// This module provides the control layer that decides whether, how and when a
/// failed registration is retried, recovered or degraded:
/// - Error classification into kind/severity/category plus eligibility flags
/// - Retry scheduling with exponential backoff and jitter
/// - Pluggable recovery strategies ranked by historical success rate
/// - Pluggable fallback modes ranked by explicit priority
/// - Sealed per-operation reports and aggregate statistics
/// - Optional SQLite archive of sealed reports
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │   ResilienceEngine (state machine)       │
/// └───────┬───────────────────────┬──────────┘
///         │                       │
///   ┌─────┴──────┐         ┌──────┴───────┐
///   ↓            ↓         ↓              ↓
/// ┌──────────┐ ┌───────┐ ┌────────────┐ ┌─────────┐
/// │Classifier│ │ Retry │ │ReportStore │ │  Audit  │
/// └──────────┘ └───────┘ │ + Archive  │ └─────────┘
///                        └────────────┘
///         │
///         ↓
/// ┌──────────────────────────────────────────┐
/// │  Strategy Registry  →  Fallback Registry │
/// │  - connectivity / upstream recheck       │
/// │  - credential regeneration               │
/// │  - dependency resolution                 │
/// │  - metadata correction                   │
/// │  - local queue / sandbox / minimal meta  │
/// └──────────────────────────────────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,ignore
/// use registry_resilience::{EngineConfig, OperationContext, ResilienceEngine};
///
/// let engine = ResilienceEngine::builder()
///     .config(EngineConfig::load(None)?)
///     .with_builtin_strategies(&collaborators)
///     .with_builtin_fallbacks(&collaborators)
///     .build()?;
///
/// let ctx = OperationContext::new("alice").with_metadata("module_id", "net/http");
/// let payload = manifest.clone();
/// match engine.execute(ctx, move |_ctx| registry.publish(payload.clone())).await {
///     Ok(completion) => println!("{}", completion.outcome()),
///     Err(failed) => eprintln!("{}", failed),
/// }
/// ```
///
/// Operations handed to the engine must be idempotent or otherwise safe to
/// call more than once.
pub mod archive;
pub mod audit;
pub mod classification;
pub mod collaborators;
pub mod context;
pub mod engine;
pub mod fallback;
pub mod report;
pub mod retry;
pub mod store;
pub mod strategies;

// Re-export main types for convenience
pub use archive::ReportArchive;
pub use audit::{AuditEvent, AuditSink, ChannelAuditSink, NoopAuditSink, TracingAuditSink};
pub use classification::{
    ClassificationRule, ClassifiedError, ErrorCategory, ErrorClassifier, ErrorKind, Severity,
};
pub use collaborators::{
    Collaborators, ConnectivityProbe, CredentialRegenerator, Credentials, DependencyResolver,
    DurableQueue, MinimalRegistrar, SandboxRegistry, ServiceHealthProbe,
};
pub use context::{CancellationFlag, OperationContext};
pub use engine::{
    Completion, OperationFailed, ResilienceEngine, ResilienceEngineBuilder, RetryPredicate,
};
pub use fallback::{
    DegradedResult, FallbackActivation, FallbackMode, FallbackRegistry, FallbackStats,
    LocalQueueFallback, MinimalMetadataFallback, SandboxFallback,
};
pub use report::{EngineState, EntryAction, EntryOutcome, ErrorReport, Outcome, ReportEntry};
pub use retry::{next_delay, RetryController};
pub use store::{FailurePattern, ReportStore, Statistics, StoreError};
pub use strategies::{
    ConnectivityRecheck, CredentialRegeneration, DependencyResolution, MetadataCorrection,
    RecoveryAttempt, RecoveryLedger, RecoveryOutcome, RecoveryStrategy, StrategyRegistry,
    StrategyStats, UpstreamHealthRecheck,
};
