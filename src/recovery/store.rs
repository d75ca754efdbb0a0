/// In-memory store of sealed reports with aggregate statistics
///
/// Reports are kept in seal order behind a single `RwLock`. Retention is
/// enforced FIFO on every seal: the oldest reports go first once `max_reports`
/// is exceeded or once they are older than `max_age`.
use super::classification::{ErrorCategory, ErrorKind, Severity};
use super::report::{EntryAction, EntryOutcome, ErrorReport, Outcome};
use crate::config::{PatternConfig, RetentionPolicy};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Report for operation {0} is already sealed")]
    AlreadySealed(String),

    #[error("Report for operation {0} has no terminal outcome")]
    NotSealed(String),
}

/// Category whose failure rate crossed the pattern threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub category: ErrorCategory,

    /// Failure entries within the window
    pub count: usize,

    pub threshold: usize,

    #[serde(with = "humantime_serde")]
    pub window: Duration,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Aggregate view over sealed reports
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Only reports sealed within this window were counted (`None` = all)
    #[serde(with = "humantime_serde", default)]
    pub window: Option<Duration>,

    pub total_operations: usize,
    pub by_outcome: BTreeMap<Outcome, usize>,

    /// Failed operation calls by category
    pub failures_by_category: BTreeMap<ErrorCategory, usize>,
    pub failures_by_severity: BTreeMap<Severity, usize>,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,

    pub strategy_attempts: BTreeMap<String, u64>,
    pub strategy_successes: BTreeMap<String, u64>,
    pub fallback_activations: BTreeMap<String, u64>,

    /// Patterns detected over the configured pattern window
    pub patterns: Vec<FailurePattern>,
}

impl Statistics {
    pub fn outcome_count(&self, outcome: Outcome) -> usize {
        self.by_outcome.get(&outcome).copied().unwrap_or(0)
    }

    /// Share of operations that ended SUCCEEDED (1.0 when there were none)
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 1.0;
        }
        self.outcome_count(Outcome::Succeeded) as f64 / self.total_operations as f64
    }
}

#[derive(Default)]
struct StoreInner {
    /// Operation ids in seal order, oldest first
    order: VecDeque<String>,
    reports: HashMap<String, Arc<ErrorReport>>,
}

/// Earliest timestamp still inside `window`, or `None` when unbounded
fn window_start(window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_sub_signed(w))
}

pub struct ReportStore {
    inner: RwLock<StoreInner>,
    retention: RetentionPolicy,
    patterns: PatternConfig,
}

impl ReportStore {
    pub fn new(retention: RetentionPolicy, patterns: PatternConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            retention,
            patterns,
        }
    }

    /// Store a sealed report; each operation id can be sealed only once
    pub fn seal(&self, report: ErrorReport) -> Result<Arc<ErrorReport>, StoreError> {
        if !report.is_sealed() {
            return Err(StoreError::NotSealed(report.operation_id));
        }

        let report = Arc::new(report);
        let mut inner = self.inner.write();

        if inner.reports.contains_key(&report.operation_id) {
            return Err(StoreError::AlreadySealed(report.operation_id.clone()));
        }

        inner.order.push_back(report.operation_id.clone());
        inner
            .reports
            .insert(report.operation_id.clone(), Arc::clone(&report));

        let evicted = self.evict(&mut inner);
        if evicted > 0 {
            tracing::debug!(evicted, retained = inner.order.len(), "Evicted old reports");
        }

        Ok(report)
    }

    pub fn get(&self, operation_id: &str) -> Option<Arc<ErrorReport>> {
        self.inner.read().reports.get(operation_id).cloned()
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.inner.read().reports.contains_key(operation_id)
    }

    /// Up to `limit` reports, newest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<ErrorReport>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.reports.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the retention policy now; returns the number of evicted reports
    pub fn enforce_retention(&self) -> usize {
        let mut inner = self.inner.write();
        self.evict(&mut inner)
    }

    fn evict(&self, inner: &mut StoreInner) -> usize {
        let mut evicted = 0;

        while inner.order.len() > self.retention.max_reports {
            if let Some(id) = inner.order.pop_front() {
                inner.reports.remove(&id);
                evicted += 1;
            }
        }

        if let Some(cutoff) = self.retention.max_age.and_then(window_start) {
            while let Some(id) = inner.order.front() {
                let expired = inner
                    .reports
                    .get(id)
                    .and_then(|r| r.sealed_at)
                    .map_or(true, |sealed| sealed < cutoff);
                if !expired {
                    break;
                }
                if let Some(id) = inner.order.pop_front() {
                    inner.reports.remove(&id);
                    evicted += 1;
                }
            }
        }

        evicted
    }

    /// Statistics over reports sealed within `window` (all reports when `None`)
    pub fn aggregate(&self, window: Option<Duration>) -> Statistics {
        let cutoff = window.and_then(window_start);
        let mut stats = Statistics {
            window,
            ..Statistics::default()
        };

        {
            let inner = self.inner.read();
            for report in inner.order.iter().filter_map(|id| inner.reports.get(id)) {
                let in_window = match (cutoff, report.sealed_at) {
                    (Some(cutoff), Some(sealed)) => sealed >= cutoff,
                    _ => true,
                };
                if !in_window {
                    continue;
                }

                stats.total_operations += 1;
                if let Some(outcome) = report.outcome {
                    *stats.by_outcome.entry(outcome).or_insert(0) += 1;
                }

                for error in report.attempt_failures().filter_map(|e| e.error.as_ref()) {
                    *stats.failures_by_category.entry(error.category).or_insert(0) += 1;
                    *stats.failures_by_severity.entry(error.severity).or_insert(0) += 1;
                    *stats.failures_by_kind.entry(error.kind).or_insert(0) += 1;
                }

                for entry in &report.entries {
                    match &entry.action {
                        EntryAction::Recovery {
                            strategy_id: Some(id),
                        } => {
                            *stats.strategy_attempts.entry(id.clone()).or_insert(0) += 1;
                            if entry.outcome == EntryOutcome::Succeeded {
                                *stats.strategy_successes.entry(id.clone()).or_insert(0) += 1;
                            }
                        }
                        EntryAction::Fallback {
                            fallback_id: Some(id),
                        } if entry.outcome == EntryOutcome::Succeeded => {
                            *stats.fallback_activations.entry(id.clone()).or_insert(0) += 1;
                        }
                        _ => {}
                    }
                }
            }
        }

        stats.patterns = self.detect_patterns();
        stats
    }

    /// Categories whose failed attempts within the pattern window exceed the threshold
    pub fn detect_patterns(&self) -> Vec<FailurePattern> {
        let window = self.patterns.window;
        let cutoff = window_start(window);
        let mut seen: BTreeMap<ErrorCategory, (usize, DateTime<Utc>, DateTime<Utc>)> =
            BTreeMap::new();

        let inner = self.inner.read();
        for report in inner.reports.values() {
            for entry in report.attempt_failures() {
                let Some(error) = &entry.error else { continue };
                if cutoff.is_some_and(|cutoff| entry.timestamp < cutoff) {
                    continue;
                }

                let slot = seen
                    .entry(error.category)
                    .or_insert((0, entry.timestamp, entry.timestamp));
                slot.0 += 1;
                slot.1 = slot.1.min(entry.timestamp);
                slot.2 = slot.2.max(entry.timestamp);
            }
        }

        seen.into_iter()
            .filter(|(_, (count, _, _))| *count > self.patterns.threshold)
            .map(|(category, (count, first_seen, last_seen))| FailurePattern {
                category,
                count,
                threshold: self.patterns.threshold,
                window,
                first_seen,
                last_seen,
            })
            .collect()
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default(), PatternConfig::default())
    }
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore")
            .field("reports", &self.len())
            .field("retention", &self.retention)
            .field("patterns", &self.patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::ClassifiedError;
    use crate::recovery::report::{EngineState, ReportEntry};

    fn sealed(id: &str, outcome: Outcome, failures: &[ErrorKind]) -> ErrorReport {
        let mut report = ErrorReport::open(id, "tester");
        for (i, kind) in failures.iter().enumerate() {
            report.append(
                ReportEntry::new(
                    i as u32 + 1,
                    EngineState::Attempting,
                    EngineState::WaitingRetry,
                    EntryAction::Attempt,
                    EntryOutcome::Failed,
                )
                .with_error(ClassifiedError::from_kind(*kind)),
            );
        }
        report.seal(outcome);
        report
    }

    #[test]
    fn test_seal_and_get() {
        let store = ReportStore::default();
        store.seal(sealed("a", Outcome::Succeeded, &[])).unwrap();

        let report = store.get("a").unwrap();
        assert_eq!(report.outcome, Some(Outcome::Succeeded));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_seal_rejects_duplicates_and_unsealed() {
        let store = ReportStore::default();
        store.seal(sealed("a", Outcome::Succeeded, &[])).unwrap();

        assert_eq!(
            store.seal(sealed("a", Outcome::Failed, &[])).unwrap_err(),
            StoreError::AlreadySealed("a".to_string())
        );
        assert_eq!(store.get("a").unwrap().outcome, Some(Outcome::Succeeded));

        let open = ErrorReport::open("b", "tester");
        assert_eq!(
            store.seal(open).unwrap_err(),
            StoreError::NotSealed("b".to_string())
        );
    }

    #[test]
    fn test_recent_is_newest_first() {
        let store = ReportStore::default();
        for id in ["a", "b", "c"] {
            store.seal(sealed(id, Outcome::Succeeded, &[])).unwrap();
        }

        let ids: Vec<String> = store
            .recent(2)
            .iter()
            .map(|r| r.operation_id.clone())
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_capacity_eviction_is_fifo() {
        let retention = RetentionPolicy {
            max_reports: 2,
            max_age: None,
        };
        let store = ReportStore::new(retention, PatternConfig::default());
        for id in ["a", "b", "c"] {
            store.seal(sealed(id, Outcome::Succeeded, &[])).unwrap();
        }

        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_age_eviction() {
        let retention = RetentionPolicy {
            max_reports: 100,
            max_age: Some(Duration::from_secs(60)),
        };
        let store = ReportStore::new(retention, PatternConfig::default());

        let mut old = sealed("old", Outcome::Failed, &[]);
        old.sealed_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.inner.write().order.push_back("old".to_string());
        store
            .inner
            .write()
            .reports
            .insert("old".to_string(), Arc::new(old));

        store.seal(sealed("new", Outcome::Succeeded, &[])).unwrap();
        assert!(!store.contains("old"));
        assert!(store.contains("new"));
        assert_eq!(store.enforce_retention(), 0);
    }

    #[test]
    fn test_aggregate_counts() {
        let store = ReportStore::default();
        store.seal(sealed("a", Outcome::Succeeded, &[])).unwrap();
        store
            .seal(sealed("b", Outcome::Succeeded, &[ErrorKind::Network, ErrorKind::Timeout]))
            .unwrap();
        store
            .seal(sealed("c", Outcome::Failed, &[ErrorKind::Unknown]))
            .unwrap();

        let stats = store.aggregate(None);
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.outcome_count(Outcome::Succeeded), 2);
        assert_eq!(stats.outcome_count(Outcome::Failed), 1);
        assert_eq!(stats.failures_by_category.get(&ErrorCategory::Transient), Some(&2));
        assert_eq!(stats.failures_by_category.get(&ErrorCategory::Persistent), Some(&1));
        assert_eq!(stats.failures_by_kind.get(&ErrorKind::Timeout), Some(&1));
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.patterns.is_empty());
    }

    #[test]
    fn test_recovery_and_fallback_failures_not_recounted() {
        let patterns = PatternConfig {
            threshold: 1,
            window: Duration::from_secs(300),
        };
        let store = ReportStore::new(RetentionPolicy::default(), patterns);
        let error = ClassifiedError::from_kind(ErrorKind::UpstreamUnavailable);

        let mut report = ErrorReport::open("outage", "tester");
        report.append(
            ReportEntry::new(
                1,
                EngineState::Attempting,
                EngineState::Recovering,
                EntryAction::Attempt,
                EntryOutcome::Failed,
            )
            .with_error(error.clone()),
        );
        report.append(
            ReportEntry::new(
                1,
                EngineState::Recovering,
                EngineState::Recovering,
                EntryAction::Recovery {
                    strategy_id: Some("upstream-health-recheck".to_string()),
                },
                EntryOutcome::Failed,
            )
            .with_error(error.clone()),
        );
        report.append(
            ReportEntry::new(
                1,
                EngineState::Fallback,
                EngineState::Failed,
                EntryAction::Fallback {
                    fallback_id: Some("sandbox-registration".to_string()),
                },
                EntryOutcome::Failed,
            )
            .with_error(error),
        );
        report.seal(Outcome::Failed);
        store.seal(report).unwrap();

        let stats = store.aggregate(None);
        assert_eq!(stats.failures_by_category.get(&ErrorCategory::Transient), Some(&1));
        assert_eq!(stats.failures_by_kind.get(&ErrorKind::UpstreamUnavailable), Some(&1));
        assert_eq!(stats.strategy_attempts.get("upstream-health-recheck"), Some(&1));
        assert!(stats.patterns.is_empty());
    }

    #[test]
    fn test_pattern_requires_strictly_more_than_threshold() {
        let patterns = PatternConfig {
            threshold: 3,
            window: Duration::from_secs(300),
        };
        let store = ReportStore::new(RetentionPolicy::default(), patterns);

        store
            .seal(sealed("a", Outcome::Failed, &[ErrorKind::Network; 3]))
            .unwrap();
        assert!(store.detect_patterns().is_empty());

        store
            .seal(sealed("b", Outcome::Failed, &[ErrorKind::Timeout]))
            .unwrap();
        let detected = store.detect_patterns();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].category, ErrorCategory::Transient);
        assert_eq!(detected[0].count, 4);
        assert!(detected[0].first_seen <= detected[0].last_seen);
    }

    #[test]
    fn test_statistics_serialize() {
        let store = ReportStore::default();
        store
            .seal(sealed("a", Outcome::Failed, &[ErrorKind::Conflict]))
            .unwrap();

        let json = serde_json::to_value(store.aggregate(Some(Duration::from_secs(3600)))).unwrap();
        assert_eq!(json["by_outcome"]["FAILED"], 1);
        assert_eq!(json["failures_by_category"]["PERSISTENT"], 1);
        assert_eq!(json["window"], "1h");
    }
}
