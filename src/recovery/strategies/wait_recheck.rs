/// Wait-and-recheck strategies for transient failures
///
/// Both strategies pause for a short settle period and then ask a probe whether
/// the condition behind the failure has cleared. They may be applied more than
/// once per operation (bounded by the registry's per-operation cap).
use super::{RecoveryOutcome, RecoveryStrategy};
use crate::recovery::classification::{ClassifiedError, ErrorCategory};
use crate::recovery::collaborators::{ConnectivityProbe, ServiceHealthProbe};
use crate::recovery::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default settle period before probing
pub const DEFAULT_RECHECK_DELAY: Duration = Duration::from_secs(2);

/// Service probed when neither the error nor the context names one
pub const DEFAULT_SERVICE: &str = "registry";

/// Wait, then confirm network connectivity to the registry is back
pub struct ConnectivityRecheck {
    probe: Arc<dyn ConnectivityProbe>,
    recheck_delay: Duration,
}

impl ConnectivityRecheck {
    pub const ID: &'static str = "connectivity-recheck";

    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            probe,
            recheck_delay: DEFAULT_RECHECK_DELAY,
        }
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }
}

#[async_trait]
impl RecoveryStrategy for ConnectivityRecheck {
    fn id(&self) -> &str {
        Self::ID
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Transient
    }

    fn retryable_within_recovery(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        ctx: &OperationContext,
        _error: &ClassifiedError,
    ) -> Result<RecoveryOutcome> {
        tracing::debug!(
            operation_id = %ctx.operation_id,
            delay = %humantime::format_duration(self.recheck_delay),
            "Waiting before connectivity recheck"
        );
        tokio::time::sleep(self.recheck_delay).await;

        if self.probe.is_reachable().await {
            Ok(RecoveryOutcome::recovered("network connectivity restored"))
        } else {
            Ok(RecoveryOutcome::not_recovered("network still unreachable"))
        }
    }
}

/// Wait, then confirm the failing upstream service reports healthy
pub struct UpstreamHealthRecheck {
    probe: Arc<dyn ServiceHealthProbe>,
    recheck_delay: Duration,
}

impl UpstreamHealthRecheck {
    pub const ID: &'static str = "upstream-health-recheck";

    pub fn new(probe: Arc<dyn ServiceHealthProbe>) -> Self {
        Self {
            probe,
            recheck_delay: DEFAULT_RECHECK_DELAY,
        }
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    /// Service named by the error, then the context, then the registry itself
    fn service_for<'a>(ctx: &'a OperationContext, error: &'a ClassifiedError) -> &'a str {
        error
            .diagnostic("service")
            .or_else(|| ctx.metadata_value("service"))
            .unwrap_or(DEFAULT_SERVICE)
    }
}

#[async_trait]
impl RecoveryStrategy for UpstreamHealthRecheck {
    fn id(&self) -> &str {
        Self::ID
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Transient
    }

    fn retryable_within_recovery(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
    ) -> Result<RecoveryOutcome> {
        let service = Self::service_for(ctx, error);
        tokio::time::sleep(self.recheck_delay).await;

        if self.probe.is_healthy(service).await {
            Ok(RecoveryOutcome::recovered(format!("service {} healthy again", service)))
        } else {
            Ok(RecoveryOutcome::not_recovered(format!(
                "service {} still unhealthy",
                service
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::ErrorKind;
    use crate::recovery::collaborators::{MockConnectivityProbe, MockServiceHealthProbe};

    #[tokio::test]
    async fn test_connectivity_recovered_when_reachable() {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().times(1).return_const(true);

        let strategy = ConnectivityRecheck::new(Arc::new(probe)).with_recheck_delay(Duration::ZERO);
        let outcome = strategy
            .apply(
                &OperationContext::new("test"),
                &ClassifiedError::from_kind(ErrorKind::Network),
            )
            .await
            .unwrap();
        assert!(outcome.is_recovered());
    }

    #[tokio::test]
    async fn test_connectivity_not_recovered_when_unreachable() {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().return_const(false);

        let strategy = ConnectivityRecheck::new(Arc::new(probe)).with_recheck_delay(Duration::ZERO);
        let outcome = strategy
            .apply(
                &OperationContext::new("test"),
                &ClassifiedError::from_kind(ErrorKind::Network),
            )
            .await
            .unwrap();
        assert!(!outcome.is_recovered());
        assert!(strategy.retryable_within_recovery());
        assert!(!strategy.applies_to(ErrorCategory::Validation));
    }

    #[tokio::test]
    async fn test_upstream_probes_service_from_error() {
        let mut probe = MockServiceHealthProbe::new();
        probe
            .expect_is_healthy()
            .withf(|service| service == "index")
            .times(1)
            .return_const(true);

        let strategy =
            UpstreamHealthRecheck::new(Arc::new(probe)).with_recheck_delay(Duration::ZERO);
        let error = ClassifiedError::from_kind(ErrorKind::UpstreamUnavailable)
            .with_diagnostic("service", "index");
        let outcome = strategy
            .apply(&OperationContext::new("test"), &error)
            .await
            .unwrap();
        assert!(outcome.is_recovered());
    }

    #[tokio::test]
    async fn test_upstream_falls_back_to_default_service() {
        let mut probe = MockServiceHealthProbe::new();
        probe
            .expect_is_healthy()
            .withf(|service| service == DEFAULT_SERVICE)
            .return_const(false);

        let strategy =
            UpstreamHealthRecheck::new(Arc::new(probe)).with_recheck_delay(Duration::ZERO);
        let outcome = strategy
            .apply(
                &OperationContext::new("test"),
                &ClassifiedError::from_kind(ErrorKind::UpstreamUnavailable),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RecoveryOutcome::not_recovered("service registry still unhealthy")
        );
    }
}
