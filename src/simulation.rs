/// Simulated registry and collaborators for exercising the engine
///
/// Each simulated registration carries its failure plan in the operation
/// context metadata, so the wrapped operation is stateless and safe to repeat.
/// The simulated collaborators succeed except where a scenario needs them not to
/// (an outage keeps the upstream unhealthy so the run ends in a fallback).
use crate::recovery::collaborators::{
    Collaborators, ConnectivityProbe, CredentialRegenerator, Credentials, DependencyResolver,
    DurableQueue, MinimalRegistrar, SandboxRegistry, ServiceHealthProbe,
};
use crate::recovery::context::OperationContext;
use crate::RegistryError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upstream service name used by the outage scenario
pub const SIMULATED_SERVICE: &str = "index";

/// Dependency reported missing by the dependency scenario
pub const SIMULATED_DEPENDENCY: &str = "libregistry-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Network failures that clear after a few attempts
    Transient,

    /// Rejected signature until credentials are regenerated
    Auth,

    /// Missing dependency until it is resolved
    Dependency,

    /// Invalid version string until metadata is corrected
    Validation,

    /// Upstream down for good; ends in a fallback
    Outage,

    /// Unrecognized failure; ends FAILED
    Unknown,

    /// Random pick of the above per operation
    Mixed,
}

impl Scenario {
    pub const CONCRETE: [Scenario; 6] = [
        Scenario::Transient,
        Scenario::Auth,
        Scenario::Dependency,
        Scenario::Validation,
        Scenario::Outage,
        Scenario::Unknown,
    ];

    fn name(&self) -> &'static str {
        match self {
            Scenario::Transient => "transient",
            Scenario::Auth => "auth",
            Scenario::Dependency => "dependency",
            Scenario::Validation => "validation",
            Scenario::Outage => "outage",
            Scenario::Unknown => "unknown",
            Scenario::Mixed => "mixed",
        }
    }

    /// Resolve `Mixed` into a concrete scenario
    fn pick(self) -> Scenario {
        match self {
            Scenario::Mixed => {
                let index = rand::thread_rng().gen_range(0..Self::CONCRETE.len());
                Self::CONCRETE[index]
            }
            concrete => concrete,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CONCRETE
            .iter()
            .chain(std::iter::once(&Scenario::Mixed))
            .find(|scenario| scenario.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown scenario '{}' (expected transient, auth, dependency, validation, outage, unknown or mixed)",
                    s
                )
            })
    }
}

/// Build the context for simulated registration number `index`
///
/// Transient plans fail for the first 1..=4 attempts, so with the default of
/// three attempts some succeed on retry, some after a connectivity recheck and
/// some only through the local queue.
pub fn plan(scenario: Scenario, index: usize) -> OperationContext {
    let scenario = scenario.pick();
    let fail_until = rand::thread_rng().gen_range(1..=4u32);

    OperationContext::new(format!("sim-actor-{}", index % 4))
        .with_metadata("scenario", scenario.name())
        .with_metadata("module_id", format!("sim/module-{}", index))
        .with_metadata("version", "v1.0.0")
        .with_metadata("fail_until", fail_until.to_string())
}

/// One simulated registration call
pub async fn publish(ctx: OperationContext, latency: Duration) -> Result<String, RegistryError> {
    if !latency.is_zero() {
        let jittered = latency.mul_f64(rand::thread_rng().gen_range(0.5..=1.5));
        tokio::time::sleep(jittered).await;
    }

    let scenario = ctx
        .metadata_value("scenario")
        .and_then(|s| s.parse::<Scenario>().ok())
        .unwrap_or(Scenario::Unknown);

    match scenario {
        Scenario::Transient => {
            let fail_until = ctx
                .metadata_value("fail_until")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1);
            if ctx.attempt <= fail_until {
                return Err(RegistryError::Network(format!(
                    "connection reset by peer (attempt {})",
                    ctx.attempt
                )));
            }
        }
        Scenario::Auth => {
            if ctx.metadata_value("credential_id").is_none() {
                return Err(RegistryError::SignatureInvalid(
                    "signing key has expired".to_string(),
                ));
            }
        }
        Scenario::Dependency => {
            if ctx.metadata_value("resolved_dependency").is_none() {
                return Err(RegistryError::MissingDependency {
                    dependency: SIMULATED_DEPENDENCY.to_string(),
                });
            }
        }
        Scenario::Validation => {
            if ctx
                .metadata_value("version")
                .map_or(true, |v| v.starts_with('v'))
            {
                return Err(RegistryError::MetadataInvalid {
                    field: "version".to_string(),
                    reason: "version must be plain semver".to_string(),
                });
            }
        }
        Scenario::Outage => {
            return Err(RegistryError::UpstreamUnavailable {
                service: SIMULATED_SERVICE.to_string(),
                reason: "503 Service Unavailable".to_string(),
            });
        }
        Scenario::Unknown | Scenario::Mixed => {
            return Err(RegistryError::Other(
                "registry returned an unexpected response".to_string(),
            ));
        }
    }

    Ok(format!(
        "registered {}",
        ctx.metadata_value("module_id").unwrap_or("module")
    ))
}

/// Collaborators backing the simulated registry
#[derive(Debug, Default)]
pub struct SimulatedEnvironment {
    keys_issued: AtomicU64,
    tickets_issued: AtomicU64,
}

impl SimulatedEnvironment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire every collaborator to this environment
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

    pub fn keys_issued(&self) -> u64 {
        self.keys_issued.load(Ordering::Relaxed)
    }

    pub fn tickets_issued(&self) -> u64 {
        self.tickets_issued.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConnectivityProbe for SimulatedEnvironment {
    async fn is_reachable(&self) -> bool {
        true
    }
}

#[async_trait]
impl ServiceHealthProbe for SimulatedEnvironment {
    async fn is_healthy(&self, service_id: &str) -> bool {
        service_id != SIMULATED_SERVICE
    }
}

#[async_trait]
impl CredentialRegenerator for SimulatedEnvironment {
    async fn regenerate(&self, ctx: &OperationContext) -> Result<Credentials> {
        let serial = self.keys_issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Credentials {
            key_id: format!("{}-key-{}", ctx.actor, serial),
            issued_at: Utc::now(),
            expires_at: Some(Utc::now() + chrono::Duration::days(90)),
        })
    }
}

#[async_trait]
impl DependencyResolver for SimulatedEnvironment {
    async fn resolve(&self, dependency_id: &str) -> Result<()> {
        tracing::debug!(dependency = dependency_id, "Simulated dependency install");
        Ok(())
    }
}

#[async_trait]
impl SandboxRegistry for SimulatedEnvironment {
    async fn register(&self, ctx: &OperationContext) -> Result<String> {
        Ok(format!("sandbox-{}", ctx.operation_id))
    }
}

#[async_trait]
impl DurableQueue for SimulatedEnvironment {
    async fn enqueue(&self, _ctx: &OperationContext) -> Result<String> {
        let ticket = self.tickets_issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("queued-{:06}", ticket))
    }
}

#[async_trait]
impl MinimalRegistrar for SimulatedEnvironment {
    async fn register_minimal(&self, ctx: &OperationContext) -> Result<(String, Vec<String>)> {
        let dropped = ctx
            .metadata
            .keys()
            .filter(|key| !matches!(key.as_str(), "module_id" | "version"))
            .cloned()
            .collect();
        Ok((format!("minimal-{}", ctx.operation_id), dropped))
    }
}
