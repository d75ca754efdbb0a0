// Allow complex types where needed for strategy/fallback trait objects
#![allow(clippy::type_complexity)]

pub mod config;
pub mod recovery;
pub mod simulation;

// Re-export the engine surface for convenience
pub use config::{ConfigError, EngineConfig, PatternConfig, RetentionPolicy, RetryPolicy};
pub use recovery::{
    CancellationFlag, ClassifiedError, Completion, DegradedResult, ErrorCategory, ErrorClassifier,
    ErrorKind, ErrorReport, OperationContext, OperationFailed, Outcome, ResilienceEngine,
    ResilienceEngineBuilder, Severity, Statistics,
};

use thiserror::Error;

/// Raw failure returned by a wrapped registry operation or collaborator.
///
/// These are never interpreted directly by the engine: every value goes through
/// [`ErrorClassifier::classify`] first.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Upstream service {service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("Remote storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Missing dependency: {dependency}")]
    MissingDependency { dependency: String },

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Metadata field '{field}' invalid: {reason}")]
    MetadataInvalid { field: String, reason: String },

    #[error("Module already registered: {0}")]
    AlreadyRegistered(String),

    #[error("{0}")]
    Other(String),
}

// Manual Clone implementation because std::io::Error doesn't implement Clone
impl Clone for RegistryError {
    fn clone(&self) -> Self {
        match self {
            RegistryError::Io(e) => RegistryError::Io(std::io::Error::new(e.kind(), e.to_string())),
            RegistryError::Network(s) => RegistryError::Network(s.clone()),
            RegistryError::Timeout(s) => RegistryError::Timeout(s.clone()),
            RegistryError::UpstreamUnavailable { service, reason } => {
                RegistryError::UpstreamUnavailable {
                    service: service.clone(),
                    reason: reason.clone(),
                }
            }
            RegistryError::StorageUnavailable(s) => RegistryError::StorageUnavailable(s.clone()),
            RegistryError::MissingDependency { dependency } => RegistryError::MissingDependency {
                dependency: dependency.clone(),
            },
            RegistryError::SignatureInvalid(s) => RegistryError::SignatureInvalid(s.clone()),
            RegistryError::PermissionDenied(s) => RegistryError::PermissionDenied(s.clone()),
            RegistryError::MetadataInvalid { field, reason } => RegistryError::MetadataInvalid {
                field: field.clone(),
                reason: reason.clone(),
            },
            RegistryError::AlreadyRegistered(s) => RegistryError::AlreadyRegistered(s.clone()),
            RegistryError::Other(s) => RegistryError::Other(s.clone()),
        }
    }
}

impl From<anyhow::Error> for RegistryError {
    fn from(err: anyhow::Error) -> Self {
        // Opaque errors carry no structure; the classifier treats them as unknown
        // unless a message rule matches.
        RegistryError::Other(format!("{:#}", err))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
