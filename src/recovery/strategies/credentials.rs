/// Credential regeneration for rejected signatures
use super::{RecoveryOutcome, RecoveryStrategy};
use crate::recovery::classification::{ClassifiedError, ErrorCategory, ErrorKind};
use crate::recovery::collaborators::CredentialRegenerator;
use crate::recovery::context::OperationContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Context metadata key carrying the id of the regenerated credentials
pub const CREDENTIAL_ID_KEY: &str = "credential_id";

pub struct CredentialRegeneration {
    regenerator: Arc<dyn CredentialRegenerator>,
}

impl CredentialRegeneration {
    pub const ID: &'static str = "regenerate-credentials";

    pub fn new(regenerator: Arc<dyn CredentialRegenerator>) -> Self {
        Self { regenerator }
    }
}

#[async_trait]
impl RecoveryStrategy for CredentialRegeneration {
    fn id(&self) -> &str {
        Self::ID
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Authorization
    }

    async fn apply(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
    ) -> Result<RecoveryOutcome> {
        // New keys do not help an actor that lacks permission altogether
        if error.kind == ErrorKind::Unauthorized {
            return Ok(RecoveryOutcome::not_recovered(
                "actor is not authorized; regenerating credentials would not help",
            ));
        }

        let credentials = self
            .regenerator
            .regenerate(ctx)
            .await
            .with_context(|| format!("Failed to regenerate credentials for {}", ctx.actor))?;

        tracing::info!(
            operation_id = %ctx.operation_id,
            actor = %ctx.actor,
            key_id = %credentials.key_id,
            "Signing credentials regenerated"
        );

        Ok(
            RecoveryOutcome::recovered(format!("regenerated credentials {}", credentials.key_id))
                .with_metadata(CREDENTIAL_ID_KEY, credentials.key_id),
        )
    }
}
