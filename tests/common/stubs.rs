/// Stub collaborators and scripted operations
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use registry_resilience::recovery::{
    Collaborators, ConnectivityProbe, CredentialRegenerator, Credentials, DependencyResolver,
    DurableQueue, FallbackMode, MinimalRegistrar, RecoveryOutcome, RecoveryStrategy,
    SandboxRegistry, ServiceHealthProbe,
};
use registry_resilience::{ClassifiedError, ErrorCategory, OperationContext, RegistryError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators that always succeed and count how often they are used
#[derive(Debug, Default)]
pub struct StubEnvironment {
    pub reachable: AtomicBool,
    pub healthy: AtomicBool,
    pub queue_down: AtomicBool,
    pub regenerations: AtomicU32,
    pub resolutions: AtomicU32,
    pub enqueued: AtomicU32,
    pub sandboxed: AtomicU32,
    pub minimal: AtomicU32,
}

impl StubEnvironment {
    pub fn new() -> Arc<Self> {
        let env = Self::default();
        env.reachable.store(true, Ordering::SeqCst);
        env.healthy.store(true, Ordering::SeqCst);
        Arc::new(env)
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators::new()
            .with_connectivity(self.clone())
            .with_health(self.clone())
            .with_credentials(self.clone())
            .with_dependencies(self.clone())
            .with_sandbox(self.clone())
            .with_queue(self.clone())
            .with_minimal(self.clone())
    }

    /// Total fallback activations across all fallback collaborators
    pub fn fallback_calls(&self) -> u32 {
        self.enqueued.load(Ordering::SeqCst)
            + self.sandboxed.load(Ordering::SeqCst)
            + self.minimal.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for StubEnvironment {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceHealthProbe for StubEnvironment {
    async fn is_healthy(&self, _service_id: &str) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRegenerator for StubEnvironment {
    async fn regenerate(&self, ctx: &OperationContext) -> Result<Credentials> {
        let serial = self.regenerations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credentials {
            key_id: format!("{}-{}", ctx.actor, serial),
            issued_at: Utc::now(),
            expires_at: None,
        })
    }
}

#[async_trait]
impl DependencyResolver for StubEnvironment {
    async fn resolve(&self, _dependency_id: &str) -> Result<()> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SandboxRegistry for StubEnvironment {
    async fn register(&self, ctx: &OperationContext) -> Result<String> {
        self.sandboxed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sandbox-{}", ctx.operation_id))
    }
}

#[async_trait]
impl DurableQueue for StubEnvironment {
    async fn enqueue(&self, _ctx: &OperationContext) -> Result<String> {
        if self.queue_down.load(Ordering::SeqCst) {
            anyhow::bail!("local queue is read-only");
        }
        let ticket = self.enqueued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ticket-{}", ticket))
    }
}

#[async_trait]
impl MinimalRegistrar for StubEnvironment {
    async fn register_minimal(&self, ctx: &OperationContext) -> Result<(String, Vec<String>)> {
        self.minimal.fetch_add(1, Ordering::SeqCst);
        Ok((
            format!("minimal-{}", ctx.operation_id),
            vec!["description".to_string()],
        ))
    }
}

/// Operation that fails with `error()` for the first `failures` calls
pub struct ScriptedOperation {
    calls: AtomicU32,
    failures: u32,
    error: fn() -> RegistryError,
}

impl ScriptedOperation {
    pub fn new(failures: u32, error: fn() -> RegistryError) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            error,
        }
    }

    /// Never succeeds
    pub fn always(error: fn() -> RegistryError) -> Self {
        Self::new(u32::MAX, error)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> Result<&'static str, RegistryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err((self.error)())
        } else {
            Ok("registered")
        }
    }
}

pub fn network_error() -> RegistryError {
    RegistryError::Network("connection reset by peer".to_string())
}

pub fn signature_error() -> RegistryError {
    RegistryError::SignatureInvalid("signing key expired".to_string())
}

pub fn conflict_error() -> RegistryError {
    RegistryError::AlreadyRegistered("net/http@1.0.0".to_string())
}

pub fn unknown_error() -> RegistryError {
    RegistryError::Other("registry returned gibberish".to_string())
}

pub fn storage_error() -> RegistryError {
    RegistryError::StorageUnavailable("object store returned 503".to_string())
}

pub fn upstream_error() -> RegistryError {
    RegistryError::UpstreamUnavailable {
        service: "index".to_string(),
        reason: "503 Service Unavailable".to_string(),
    }
}

/// Strategy for TRANSIENT errors that takes `delay` and then recovers
pub struct SlowStrategy {
    pub delay: Duration,
    pub started: AtomicU32,
}

impl SlowStrategy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for SlowStrategy {
    fn id(&self) -> &str {
        "slow-recheck"
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Transient
    }

    async fn apply(&self, _ctx: &OperationContext, _error: &ClassifiedError) -> Result<RecoveryOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(RecoveryOutcome::recovered("waited it out"))
    }
}

/// Fallback covering every error that takes `delay` to activate
pub struct SlowFallback {
    pub delay: Duration,
    pub started: AtomicU32,
}

impl SlowFallback {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FallbackMode for SlowFallback {
    fn id(&self) -> &str {
        "slow-fallback"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn applies_to(&self, _error: &ClassifiedError) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Deferred until the registry answers"
    }

    async fn activate(
        &self,
        _ctx: &OperationContext,
        _error: &ClassifiedError,
    ) -> Result<serde_json::Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "deferred": true }))
    }
}
