/// Built-in fallback modes for registry operations
///
/// Each built-in covers the situation it was made for by default (storage
/// outage, registry outage, rejected metadata). Coverage can be widened or
/// replaced with `with_kinds` and `with_categories`.
use super::FallbackMode;
use crate::recovery::classification::{ClassifiedError, ErrorCategory, ErrorKind};

/// Errors a fallback covers: any listed kind, or any kind in a listed category
#[derive(Debug, Clone)]
struct Coverage {
    kinds: Vec<ErrorKind>,
    categories: Vec<ErrorCategory>,
}

impl Coverage {
    fn kinds(kinds: &[ErrorKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            categories: Vec::new(),
        }
    }

    fn categories(categories: &[ErrorCategory]) -> Self {
        Self {
            kinds: Vec::new(),
            categories: categories.to_vec(),
        }
    }

    fn covers(&self, error: &ClassifiedError) -> bool {
        self.kinds.contains(&error.kind) || self.categories.contains(&error.category)
    }
}
use crate::recovery::collaborators::{DurableQueue, MinimalRegistrar, SandboxRegistry};
use crate::recovery::context::OperationContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Queue the registration locally; it is synced to remote storage later
pub struct LocalQueueFallback {
    queue: Arc<dyn DurableQueue>,
    coverage: Coverage,
    priority: u32,
}

impl LocalQueueFallback {
    pub const ID: &'static str = "local-queue";
    pub const DEFAULT_PRIORITY: u32 = 20;

    /// Covers remote storage outages and lost connectivity by default
    pub fn new(queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            queue,
            coverage: Coverage::kinds(&[ErrorKind::StorageUnavailable, ErrorKind::Network]),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Replace the covered kinds
    pub fn with_kinds(mut self, kinds: &[ErrorKind]) -> Self {
        self.coverage.kinds = kinds.to_vec();
        self
    }

    /// Replace the covered categories
    pub fn with_categories(mut self, categories: &[ErrorCategory]) -> Self {
        self.coverage.categories = categories.to_vec();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl FallbackMode for LocalQueueFallback {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        self.coverage.covers(error)
    }

    fn description(&self) -> &str {
        "Queued locally; the module will be synced to remote storage once it is available"
    }

    async fn activate(
        &self,
        ctx: &OperationContext,
        _error: &ClassifiedError,
    ) -> Result<serde_json::Value> {
        let ticket = self
            .queue
            .enqueue(ctx)
            .await
            .context("Failed to enqueue registration locally")?;

        Ok(json!({
            "ticket": ticket,
            "module_id": ctx.metadata_value("module_id"),
        }))
    }
}

/// Register in the sandbox registry while the primary registry is unavailable
pub struct SandboxFallback {
    sandbox: Arc<dyn SandboxRegistry>,
    coverage: Coverage,
    priority: u32,
}

impl SandboxFallback {
    pub const ID: &'static str = "sandbox-registration";
    pub const DEFAULT_PRIORITY: u32 = 10;

    /// Covers an unavailable primary registry by default
    pub fn new(sandbox: Arc<dyn SandboxRegistry>) -> Self {
        Self {
            sandbox,
            coverage: Coverage::kinds(&[ErrorKind::UpstreamUnavailable]),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Replace the covered kinds
    pub fn with_kinds(mut self, kinds: &[ErrorKind]) -> Self {
        self.coverage.kinds = kinds.to_vec();
        self
    }

    /// Replace the covered categories
    pub fn with_categories(mut self, categories: &[ErrorCategory]) -> Self {
        self.coverage.categories = categories.to_vec();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl FallbackMode for SandboxFallback {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        self.coverage.covers(error)
    }

    fn description(&self) -> &str {
        "Registered in the sandbox registry only; not visible in the primary registry"
    }

    async fn activate(
        &self,
        ctx: &OperationContext,
        _error: &ClassifiedError,
    ) -> Result<serde_json::Value> {
        let sandbox_id = self
            .sandbox
            .register(ctx)
            .await
            .context("Sandbox registration failed")?;

        Ok(json!({ "sandbox_id": sandbox_id }))
    }
}

/// Register with only the mandatory metadata fields
pub struct MinimalMetadataFallback {
    registrar: Arc<dyn MinimalRegistrar>,
    coverage: Coverage,
    priority: u32,
}

impl MinimalMetadataFallback {
    pub const ID: &'static str = "minimal-metadata";
    pub const DEFAULT_PRIORITY: u32 = 10;

    /// Covers validation failures by default
    pub fn new(registrar: Arc<dyn MinimalRegistrar>) -> Self {
        Self {
            registrar,
            coverage: Coverage::categories(&[ErrorCategory::Validation]),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Replace the covered kinds
    pub fn with_kinds(mut self, kinds: &[ErrorKind]) -> Self {
        self.coverage.kinds = kinds.to_vec();
        self
    }

    /// Replace the covered categories
    pub fn with_categories(mut self, categories: &[ErrorCategory]) -> Self {
        self.coverage.categories = categories.to_vec();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl FallbackMode for MinimalMetadataFallback {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        self.coverage.covers(error)
    }

    fn description(&self) -> &str {
        "Registered with reduced metadata; optional fields were dropped"
    }

    async fn activate(
        &self,
        ctx: &OperationContext,
        _error: &ClassifiedError,
    ) -> Result<serde_json::Value> {
        let (registration_id, dropped) = self
            .registrar
            .register_minimal(ctx)
            .await
            .context("Minimal-metadata registration failed")?;

        Ok(json!({
            "registration_id": registration_id,
            "dropped_fields": dropped,
        }))
    }
}
