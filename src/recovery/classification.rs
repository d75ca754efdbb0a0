/// Error classification for retry, recovery and fallback selection
///
/// Every raw [`RegistryError`] is normalized into a [`ClassifiedError`]: a kind,
/// a severity, a category and two eligibility flags. Classification is total:
/// anything not recognized becomes [`ErrorKind::Unknown`], which is persistent
/// and neither retried nor recovered.
use crate::RegistryError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad failure category; strategies and fallbacks are scoped by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Likely to resolve on its own (network glitch, upstream restart)
    Transient,

    /// Will not resolve by waiting (conflict, unknown failure)
    Persistent,

    /// Environment or dependency set-up is wrong
    Configuration,

    /// Credentials or signatures rejected
    Authorization,

    /// Payload rejected by registry validation
    Validation,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Transient,
        ErrorCategory::Persistent,
        ErrorCategory::Configuration,
        ErrorCategory::Authorization,
        ErrorCategory::Validation,
    ];

    /// Get human-readable description of the category
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "Temporary failure that may resolve on retry",
            ErrorCategory::Persistent => "Failure that will not resolve without intervention",
            ErrorCategory::Configuration => "Missing or misconfigured dependency",
            ErrorCategory::Authorization => "Credentials or signature rejected",
            ErrorCategory::Validation => "Submitted data failed validation",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Transient => "TRANSIENT",
            ErrorCategory::Persistent => "PERSISTENT",
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::Authorization => "AUTHORIZATION",
            ErrorCategory::Validation => "VALIDATION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        };
        f.write_str(name)
    }
}

/// Specific failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Timeout,
    UpstreamUnavailable,
    StorageUnavailable,
    MissingDependency,
    SignatureInvalid,
    Unauthorized,
    MetadataInvalid,
    Conflict,

    /// Synthesized by the engine when the cancellation flag is raised
    Cancelled,

    /// Synthesized by the engine when the operation deadline passes
    DeadlineExceeded,

    /// Synthesized by the engine when an operation id is already in use
    DuplicateOperation,

    Unknown,
}

/// Static classification profile of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub recoverable: bool,
}

impl ErrorKind {
    /// Category, severity and eligibility flags for this kind
    pub fn profile(&self) -> KindProfile {
        use ErrorCategory::*;
        use Severity::*;

        let (category, severity, retryable, recoverable) = match self {
            ErrorKind::Network => (Transient, Medium, true, true),
            ErrorKind::Timeout => (Transient, Medium, true, false),
            ErrorKind::UpstreamUnavailable => (Transient, High, true, true),
            ErrorKind::StorageUnavailable => (Transient, High, true, false),
            ErrorKind::MissingDependency => (Configuration, Medium, false, true),
            ErrorKind::SignatureInvalid => (Authorization, High, false, true),
            ErrorKind::Unauthorized => (Authorization, Critical, false, false),
            ErrorKind::MetadataInvalid => (Validation, Low, false, true),
            ErrorKind::Conflict => (Persistent, High, false, false),
            ErrorKind::Cancelled => (Transient, Low, false, false),
            ErrorKind::DeadlineExceeded => (Transient, Medium, false, false),
            ErrorKind::DuplicateOperation => (Persistent, High, false, false),
            ErrorKind::Unknown => (Persistent, High, false, false),
        };

        KindProfile {
            category,
            severity,
            retryable,
            recoverable,
        }
    }

    /// User-facing message; never contains raw diagnostics
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "The registry could not be reached over the network.",
            ErrorKind::Timeout => "The registry did not respond in time.",
            ErrorKind::UpstreamUnavailable => "The registry service is temporarily unavailable.",
            ErrorKind::StorageUnavailable => "Remote module storage is temporarily unavailable.",
            ErrorKind::MissingDependency => "A required dependency of the module is missing.",
            ErrorKind::SignatureInvalid => "The module signature was rejected.",
            ErrorKind::Unauthorized => "You are not authorized to perform this registration.",
            ErrorKind::MetadataInvalid => "The module metadata did not pass validation.",
            ErrorKind::Conflict => "This module version is already registered.",
            ErrorKind::Cancelled => "The operation was cancelled.",
            ErrorKind::DeadlineExceeded => "The operation did not complete before its deadline.",
            ErrorKind::DuplicateOperation => "An operation with this id is already in progress or finished.",
            ErrorKind::Unknown => "The registration failed for an unexpected reason.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde spelling so logs, JSON and CLI output agree
        let name = match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorKind::MissingDependency => "MISSING_DEPENDENCY",
            ErrorKind::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::MetadataInvalid => "METADATA_INVALID",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::DuplicateOperation => "DUPLICATE_OPERATION",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Classified error with recovery information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub category: ErrorCategory,

    /// Eligible for another attempt of the original operation
    pub retryable: bool,

    /// Eligible for an automated recovery strategy
    pub recoverable: bool,

    /// Human-readable message safe to show to end users
    pub message: String,

    /// Diagnostic key/value pairs for operators (raw error text, service, field...)
    pub diagnostics: BTreeMap<String, String>,

    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Build an error of `kind` using its default profile
    pub fn from_kind(kind: ErrorKind) -> Self {
        let profile = kind.profile();
        Self {
            kind,
            severity: profile.severity,
            category: profile.category,
            retryable: profile.retryable,
            recoverable: profile.recoverable,
            message: kind.user_message().to_string(),
            diagnostics: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Error reported when an operation is cancelled
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Cancelled).with_diagnostic("reason", reason)
    }

    /// Error reported when an operation runs past its deadline
    pub fn deadline_exceeded() -> Self {
        Self::from_kind(ErrorKind::DeadlineExceeded)
    }

    /// Error reported when an operation id is already taken
    pub fn duplicate_operation(operation_id: &str) -> Self {
        Self::from_kind(ErrorKind::DuplicateOperation).with_diagnostic("operation_id", operation_id)
    }

    /// Add a diagnostic entry
    pub fn with_diagnostic(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.diagnostics.insert(key.into(), value.into());
        self
    }

    /// Get a diagnostic entry
    pub fn diagnostic(&self, key: &str) -> Option<&str> {
        self.diagnostics.get(key).map(String::as_str)
    }

    /// Whether this error ends the operation without touching retries/recovery/fallback
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}): {}",
            self.kind, self.category, self.severity, self.message
        )
    }
}

/// Predicate half of a classification rule
enum RuleMatcher {
    Predicate(Box<dyn Fn(&RegistryError) -> bool + Send + Sync>),
    MessagePattern(Regex),
}

/// Caller-supplied mapping from raw errors to a kind, checked before built-ins
pub struct ClassificationRule {
    name: String,
    matcher: RuleMatcher,
    kind: ErrorKind,
}

impl ClassificationRule {
    /// Rule matching on an arbitrary predicate
    pub fn predicate<F>(name: impl Into<String>, kind: ErrorKind, predicate: F) -> Self
    where
        F: Fn(&RegistryError) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher: RuleMatcher::Predicate(Box::new(predicate)),
            kind,
        }
    }

    /// Rule matching the error's display text against a regular expression
    pub fn message_pattern(name: impl Into<String>, kind: ErrorKind, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            matcher: RuleMatcher::MessagePattern(pattern),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, error: &RegistryError) -> bool {
        match &self.matcher {
            RuleMatcher::Predicate(predicate) => predicate(error),
            RuleMatcher::MessagePattern(pattern) => pattern.is_match(&error.to_string()),
        }
    }
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Error classifier - maps raw errors to classified errors
#[derive(Debug)]
pub struct ErrorClassifier {
    /// Caller rules, checked in order before anything else
    rules: Vec<ClassificationRule>,

    /// Built-in message rules for opaque `Other` errors
    message_rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    /// Create a classifier with the built-in mappings only
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            message_rules: builtin_message_rules(),
        }
    }

    /// Append a caller rule; rules are checked in the order they were added
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a caller rule in place
    pub fn add_rule(&mut self, rule: ClassificationRule) {
        self.rules.push(rule);
    }

    /// Classify a raw error
    pub fn classify(&self, error: &RegistryError) -> ClassifiedError {
        let (kind, rule) = match self.rules.iter().find(|rule| rule.matches(error)) {
            Some(rule) => (rule.kind, Some(rule.name.as_str())),
            None => (self.classify_error(error), None),
        };

        let mut classified =
            ClassifiedError::from_kind(kind).with_diagnostic("error", error.to_string());
        if let Some(rule) = rule {
            classified = classified.with_diagnostic("rule", rule);
        }

        // Carry structured details the recovery strategies rely on
        match error {
            RegistryError::UpstreamUnavailable { service, .. } => {
                classified = classified.with_diagnostic("service", service.as_str());
            }
            RegistryError::MissingDependency { dependency } => {
                classified = classified.with_diagnostic("dependency", dependency.as_str());
            }
            RegistryError::MetadataInvalid { field, reason } => {
                classified = classified
                    .with_diagnostic("field", field.as_str())
                    .with_diagnostic("reason", reason.as_str());
            }
            RegistryError::Io(io_err) => {
                classified = classified.with_diagnostic("io_kind", format!("{:?}", io_err.kind()));
            }
            _ => {}
        }

        classified
    }

    /// Determine the kind based on the error variant
    fn classify_error(&self, error: &RegistryError) -> ErrorKind {
        match error {
            RegistryError::Network(_) => ErrorKind::Network,
            RegistryError::Timeout(_) => ErrorKind::Timeout,
            RegistryError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            RegistryError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            RegistryError::MissingDependency { .. } => ErrorKind::MissingDependency,
            RegistryError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            RegistryError::PermissionDenied(_) => ErrorKind::Unauthorized,
            RegistryError::MetadataInvalid { .. } => ErrorKind::MetadataInvalid,
            RegistryError::AlreadyRegistered(_) => ErrorKind::Conflict,

            // I/O errors - analyze the underlying error
            RegistryError::Io(io_err) => self.classify_io_error(io_err),

            // Opaque errors - only recognizable by their text
            RegistryError::Other(_) => self
                .message_rules
                .iter()
                .find(|rule| rule.matches(error))
                .map(|rule| rule.kind)
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Classify I/O errors more granularly
    fn classify_io_error(&self, io_err: &std::io::Error) -> ErrorKind {
        use std::io::ErrorKind as Io;

        match io_err.kind() {
            Io::TimedOut => ErrorKind::Timeout,

            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::AddrNotAvailable
            | Io::Interrupted
            | Io::WouldBlock => ErrorKind::Network,

            Io::PermissionDenied => ErrorKind::Unauthorized,

            // Unlike a device, an unrecognized I/O failure here is not assumed transient
            _ => ErrorKind::Unknown,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_message_rules() -> Vec<ClassificationRule> {
    let patterns = [
        ("timeout-text", ErrorKind::Timeout, r"(?i)\btimed?[ -]?out\b"),
        (
            "network-text",
            ErrorKind::Network,
            r"(?i)connection (refused|reset|closed)|network (is )?unreachable|dns|no route to host",
        ),
        (
            "unavailable-text",
            ErrorKind::UpstreamUnavailable,
            r"(?i)\b503\b|service unavailable|bad gateway|\b502\b",
        ),
    ];

    patterns
        .into_iter()
        .filter_map(|(name, kind, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(ClassificationRule::message_pattern(name, kind, regex)),
            Err(e) => {
                tracing::error!(rule = name, error = %e, "Invalid built-in classification pattern");
                None
            }
        })
        .collect()
}
