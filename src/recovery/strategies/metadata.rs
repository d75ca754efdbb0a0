/// Metadata correction for validation failures
///
/// Works purely on the operation context: values are trimmed, a leading `v` is
/// dropped from `version`, and the field named by the error is filled from the
/// configured defaults when it is missing or blank. The corrections travel back
/// to the engine as metadata updates.
use super::{RecoveryOutcome, RecoveryStrategy};
use crate::recovery::classification::{ClassifiedError, ErrorCategory};
use crate::recovery::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct MetadataCorrection {
    defaults: BTreeMap<String, String>,
}

impl MetadataCorrection {
    pub const ID: &'static str = "correct-metadata";

    pub fn new() -> Self {
        Self::default()
    }

    /// Value used for `field` when it is missing or blank
    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    /// Compute the corrected values that differ from the current metadata
    fn corrections(&self, ctx: &OperationContext, field: Option<&str>) -> BTreeMap<String, String> {
        let mut updates = BTreeMap::new();

        for (key, value) in &ctx.metadata {
            let mut corrected = value.trim();
            if key == "version" {
                corrected = corrected.strip_prefix('v').unwrap_or(corrected);
            }
            if corrected != value {
                updates.insert(key.clone(), corrected.to_string());
            }
        }

        if let Some(field) = field {
            let current = updates
                .get(field)
                .map(String::as_str)
                .or_else(|| ctx.metadata_value(field))
                .unwrap_or("");
            if current.is_empty() {
                if let Some(default) = self.defaults.get(field) {
                    updates.insert(field.to_string(), default.clone());
                }
            }
        }

        updates
    }
}

#[async_trait]
impl RecoveryStrategy for MetadataCorrection {
    fn id(&self) -> &str {
        Self::ID
    }

    fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Validation
    }

    async fn apply(
        &self,
        ctx: &OperationContext,
        error: &ClassifiedError,
    ) -> Result<RecoveryOutcome> {
        let field = error.diagnostic("field");
        let updates = self.corrections(ctx, field);

        if updates.is_empty() {
            return Ok(RecoveryOutcome::not_recovered(match field {
                Some(field) => format!("no correction available for field {}", field),
                None => "no correction available".to_string(),
            }));
        }

        let fields: Vec<&str> = updates.keys().map(String::as_str).collect();
        let mut outcome = RecoveryOutcome::recovered(format!("corrected {}", fields.join(", ")));
        for (key, value) in updates {
            outcome = outcome.with_metadata(key, value);
        }
        Ok(outcome)
    }
}
