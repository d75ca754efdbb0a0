/// Per-operation error reports
///
/// A report is opened when an operation starts, receives one entry per state
/// transition, and is sealed exactly once with the terminal outcome. After
/// sealing it is shared read-only as `Arc<ErrorReport>`.
use super::classification::ClassifiedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Succeeded,
    Degraded,
    Failed,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Succeeded, Outcome::Degraded, Outcome::Failed];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Succeeded => "SUCCEEDED",
            Outcome::Degraded => "DEGRADED",
            Outcome::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// States of the engine's per-operation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Attempting,
    WaitingRetry,
    Recovering,
    Fallback,
    Succeeded,
    Degraded,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Succeeded | EngineState::Degraded | EngineState::Failed
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Attempting => "ATTEMPTING",
            EngineState::WaitingRetry => "WAITING_RETRY",
            EngineState::Recovering => "RECOVERING",
            EngineState::Fallback => "FALLBACK",
            EngineState::Succeeded => "SUCCEEDED",
            EngineState::Degraded => "DEGRADED",
            EngineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What the engine did in a report entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryAction {
    /// Call of the wrapped operation
    Attempt,

    /// Recovery phase; `None` when no strategy was eligible
    Recovery { strategy_id: Option<String> },

    /// Fallback phase; `None` when no fallback applied
    Fallback { fallback_id: Option<String> },
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryAction::Attempt => f.write_str("attempt"),
            EntryAction::Recovery {
                strategy_id: Some(id),
            } => write!(f, "recovery:{}", id),
            EntryAction::Recovery { strategy_id: None } => f.write_str("recovery"),
            EntryAction::Fallback {
                fallback_id: Some(id),
            } => write!(f, "fallback:{}", id),
            EntryAction::Fallback { fallback_id: None } => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Failed,
    Succeeded,
    Skipped,
    Cancelled,
}

/// One state transition of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp: DateTime<Utc>,

    /// Attempt number current when the entry was recorded
    pub attempt: u32,

    pub from: EngineState,
    pub to: EngineState,
    pub action: EntryAction,
    pub outcome: EntryOutcome,

    /// Error that caused the transition, if any
    pub error: Option<ClassifiedError>,

    /// Delay scheduled before the next attempt
    #[serde(with = "humantime_serde", default)]
    pub retry_delay: Option<Duration>,

    pub note: Option<String>,
}

impl ReportEntry {
    pub fn new(
        attempt: u32,
        from: EngineState,
        to: EngineState,
        action: EntryAction,
        outcome: EntryOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt,
            from,
            to,
            action,
            outcome,
            error: None,
            retry_delay: None,
            note: None,
        }
    }

    pub fn with_error(mut self, error: ClassifiedError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Entry records a failure of the operation, a strategy or a fallback
    pub fn is_failure(&self) -> bool {
        self.outcome == EntryOutcome::Failed
    }
}

/// History of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub operation_id: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub entries: Vec<ReportEntry>,
    pub outcome: Option<Outcome>,
}

impl ErrorReport {
    /// Open a report for an operation
    pub fn open(operation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            actor: actor.into(),
            created_at: now,
            first_failure_at: None,
            updated_at: now,
            sealed_at: None,
            entries: Vec::new(),
            outcome: None,
        }
    }

    /// Append an entry; ignored once the report is sealed
    pub fn append(&mut self, entry: ReportEntry) {
        if self.is_sealed() {
            tracing::warn!(
                operation_id = %self.operation_id,
                "Ignoring entry appended to a sealed report"
            );
            return;
        }

        if entry.error.is_some() && self.first_failure_at.is_none() {
            self.first_failure_at = Some(entry.timestamp);
        }
        self.updated_at = entry.timestamp;
        self.entries.push(entry);
    }

    /// Record the terminal outcome
    pub fn seal(&mut self, outcome: Outcome) {
        if self.is_sealed() {
            return;
        }
        let now = Utc::now();
        self.outcome = Some(outcome);
        self.sealed_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_at.is_some()
    }

    /// Entries with a failed outcome
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Failed calls of the wrapped operation
    ///
    /// Failed recovery and fallback entries repeat the error that led to
    /// them and are left out.
    pub fn attempt_failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.failures()
            .filter(|e| e.action == EntryAction::Attempt)
    }

    /// Entries for calls of the wrapped operation
    pub fn attempt_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.action == EntryAction::Attempt)
            .count()
    }

    /// The error that decided the terminal outcome, if any
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.entries.iter().rev().find_map(|e| e.error.as_ref())
    }

    /// Wall time from opening to sealing
    pub fn duration(&self) -> Option<Duration> {
        self.sealed_at
            .and_then(|sealed| (sealed - self.created_at).to_std().ok())
    }
}
