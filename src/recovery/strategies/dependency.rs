/// Dependency resolution for configuration failures
use super::{RecoveryOutcome, RecoveryStrategy};
use crate::recovery::classification::{ClassifiedError, ErrorCategory};
use crate::recovery::collaborators::DependencyResolver;
use crate::recovery::context::OperationContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DependencyResolution {
    resolver: Arc<dyn DependencyResolver>,
}

impl DependencyResolution {
    pub const ID: &'static str = "resolve-dependency";

    pub fn new(resolver: Arc<dyn DependencyResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl RecoveryStrategy for DependencyResolution {
    fn id(&self) -> &str {
        Self::ID
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Configuration
    }

    async fn apply(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
    ) -> Result<RecoveryOutcome> {
        let Some(dependency) = error.diagnostic("dependency") else {
            return Ok(RecoveryOutcome::not_recovered(
                "failure does not name a missing dependency",
            ));
        };

        self.resolver
            .resolve(dependency)
            .await
            .with_context(|| format!("Failed to resolve dependency {}", dependency))?;

        tracing::info!(
            operation_id = %ctx.operation_id,
            dependency = %dependency,
            "Missing dependency resolved"
        );

        Ok(
            RecoveryOutcome::recovered(format!("resolved dependency {}", dependency))
                .with_metadata("resolved_dependency", dependency),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::ErrorKind;
    use crate::recovery::collaborators::MockDependencyResolver;

    #[tokio::test]
    async fn test_resolves_named_dependency() {
        let mut resolver = MockDependencyResolver::new();
        resolver
            .expect_resolve()
            .withf(|dep| dep == "libfoo")
            .times(1)
            .returning(|_| Ok(()));

        let strategy = DependencyResolution::new(Arc::new(resolver));
        let error = ClassifiedError::from_kind(ErrorKind::MissingDependency)
            .with_diagnostic("dependency", "libfoo");
        let outcome = strategy
            .apply(&OperationContext::new("test"), &error)
            .await
            .unwrap();
        assert!(outcome.is_recovered());
    }

    #[tokio::test]
    async fn test_without_dependency_name_does_nothing() {
        let mut resolver = MockDependencyResolver::new();
        resolver.expect_resolve().never();

        let strategy = DependencyResolution::new(Arc::new(resolver));
        let outcome = strategy
            .apply(
                &OperationContext::new("test"),
                &ClassifiedError::from_kind(ErrorKind::MissingDependency),
            )
            .await
            .unwrap();
        assert!(!outcome.is_recovered());
    }

    #[tokio::test]
    async fn test_resolver_failure_is_error() {
        let mut resolver = MockDependencyResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Err(anyhow::anyhow!("mirror unreachable")));

        let strategy = DependencyResolution::new(Arc::new(resolver));
        let error = ClassifiedError::from_kind(ErrorKind::MissingDependency)
            .with_diagnostic("dependency", "libbar");
        let err = strategy
            .apply(&OperationContext::new("test"), &error)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("libbar"));
    }
}
