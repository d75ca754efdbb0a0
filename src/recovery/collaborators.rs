/// Narrow interfaces to the systems around the engine
///
/// The engine never talks to the registry, signer or storage directly. Recovery
/// strategies and fallback modes reach them through these traits.
use super::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Checks whether the network path to the registry is usable
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Checks the health of a named upstream service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceHealthProbe: Send + Sync {
    async fn is_healthy(&self, service_id: &str) -> bool;
}

/// Freshly issued signing credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub key_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Regenerates signing credentials for the operation's actor
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialRegenerator: Send + Sync {
    async fn regenerate(&self, ctx: &OperationContext) -> Result<Credentials>;
}

/// Resolves or installs a missing module dependency
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, dependency_id: &str) -> Result<()>;
}

/// Sandboxed (test-mode) registry used while the primary registry is down
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SandboxRegistry: Send + Sync {
    /// Returns a sandbox registration id
    async fn register(&self, ctx: &OperationContext) -> Result<String>;
}

/// Local durable queue whose entries are synced to remote storage later
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Returns a queue ticket id
    async fn enqueue(&self, ctx: &OperationContext) -> Result<String>;
}

/// Registers a module with only the mandatory metadata fields
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MinimalRegistrar: Send + Sync {
    /// Returns the registration id and the metadata fields that were dropped
    async fn register_minimal(&self, ctx: &OperationContext) -> Result<(String, Vec<String>)>;
}

/// Bundle of collaborators used to wire the built-in strategies and fallbacks
///
/// Any collaborator left as `None` simply skips the built-ins that depend on it.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub connectivity: Option<Arc<dyn ConnectivityProbe>>,
    pub health: Option<Arc<dyn ServiceHealthProbe>>,
    pub credentials: Option<Arc<dyn CredentialRegenerator>>,
    pub dependencies: Option<Arc<dyn DependencyResolver>>,
    pub sandbox: Option<Arc<dyn SandboxRegistry>>,
    pub queue: Option<Arc<dyn DurableQueue>>,
    pub minimal: Option<Arc<dyn MinimalRegistrar>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = Some(probe);
        self
    }

    pub fn with_health(mut self, probe: Arc<dyn ServiceHealthProbe>) -> Self {
        self.health = Some(probe);
        self
    }

    pub fn with_credentials(mut self, regenerator: Arc<dyn CredentialRegenerator>) -> Self {
        self.credentials = Some(regenerator);
        self
    }

    pub fn with_dependencies(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.dependencies = Some(resolver);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxRegistry>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_minimal(mut self, registrar: Arc<dyn MinimalRegistrar>) -> Self {
        self.minimal = Some(registrar);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("connectivity", &self.connectivity.is_some())
            .field("health", &self.health.is_some())
            .field("credentials", &self.credentials.is_some())
            .field("dependencies", &self.dependencies.is_some())
            .field("sandbox", &self.sandbox.is_some())
            .field("queue", &self.queue.is_some())
            .field("minimal", &self.minimal.is_some())
            .finish()
    }
}
