/// SQLite archive of sealed error reports
///
/// The in-memory [`ReportStore`](super::store::ReportStore) is bounded; the
/// archive keeps sealed reports across restarts for later inspection. Each
/// report is stored as JSON next to a few indexed columns used for listing.
use super::report::ErrorReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Database file name used when only a directory is known
pub const DEFAULT_ARCHIVE_FILE: &str = "reports.db";

const IN_MEMORY: &str = ":memory:";

pub struct ReportArchive {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl ReportArchive {
    /// Open or create an archive; `None` opens a private in-memory database
    ///
    /// An existing directory resolves to [`DEFAULT_ARCHIVE_FILE`] inside it.
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        let db_path = match db_path {
            Some(path) if path.is_dir() => path.join(DEFAULT_ARCHIVE_FILE),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(IN_MEMORY),
        };

        if db_path.to_str() != Some(IN_MEMORY) {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context("Failed to create report archive directory")?;
            }
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open report archive {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                operation_id TEXT PRIMARY KEY NOT NULL,
                actor TEXT NOT NULL,
                outcome TEXT NOT NULL,
                failure_count INTEGER NOT NULL,
                sealed_at INTEGER NOT NULL,
                report TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sealed_at ON reports(sealed_at);
            CREATE INDEX IF NOT EXISTS idx_outcome ON reports(outcome);
            "#,
        )
        .context("Failed to create report archive schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or replace a sealed report
    pub fn save(&self, report: &ErrorReport) -> Result<()> {
        let start = Instant::now();

        let outcome = report
            .outcome
            .with_context(|| format!("Report {} is not sealed", report.operation_id))?;
        let sealed_at = report.sealed_at.unwrap_or(report.updated_at);
        let json = serde_json::to_string(report).context("Failed to serialize report")?;

        self.conn
            .lock()
            .execute(
                r#"
            INSERT OR REPLACE INTO reports (
                operation_id, actor, outcome, failure_count, sealed_at, report
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
                params![
                    report.operation_id,
                    report.actor,
                    outcome.to_string(),
                    report.failure_count() as i64,
                    sealed_at.timestamp_millis(),
                    json,
                ],
            )
            .context("Failed to insert report")?;

        tracing::trace!(
            operation_id = %report.operation_id,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Report archived"
        );

        Ok(())
    }

    pub fn load(&self, operation_id: &str) -> Result<Option<ErrorReport>> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT report FROM reports WHERE operation_id = ?1",
                params![operation_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load report")?;

        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt archived report {}", operation_id))
        })
        .transpose()
    }

    /// Up to `limit` reports, most recently sealed first
    pub fn recent(&self, limit: usize) -> Result<Vec<ErrorReport>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT report FROM reports ORDER BY sealed_at DESC, rowid DESC LIMIT ?1")
            .context("Failed to prepare report query")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .context("Failed to query reports")?;

        let mut reports = Vec::new();
        for json in rows {
            let json = json.context("Failed to read report row")?;
            reports.push(serde_json::from_str(&json).context("Corrupt archived report")?);
        }

        Ok(reports)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
            .context("Failed to count reports")?;
        Ok(count as usize)
    }

    /// Delete reports sealed before `cutoff`; returns the number deleted
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn
            .lock()
            .execute(
                "DELETE FROM reports WHERE sealed_at < ?1",
                params![cutoff.timestamp_millis()],
            )
            .context("Failed to prune reports")?;

        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Pruned archived reports");
        }

        Ok(deleted)
    }
}

impl std::fmt::Debug for ReportArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportArchive")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::{ClassifiedError, ErrorKind};
    use crate::recovery::report::{EngineState, EntryAction, EntryOutcome, Outcome, ReportEntry};

    fn sealed(id: &str, outcome: Outcome) -> ErrorReport {
        let mut report = ErrorReport::open(id, "tester");
        report.append(
            ReportEntry::new(
                1,
                EngineState::Attempting,
                EngineState::Recovering,
                EntryAction::Attempt,
                EntryOutcome::Failed,
            )
            .with_error(ClassifiedError::from_kind(ErrorKind::SignatureInvalid)),
        );
        report.seal(outcome);
        report
    }

    #[test]
    fn test_save_and_load() {
        let archive = ReportArchive::open(None).unwrap();
        let report = sealed("op-1", Outcome::Degraded);
        archive.save(&report).unwrap();

        let loaded = archive.load("op-1").unwrap().unwrap();
        assert_eq!(loaded, report);
        assert!(archive.load("op-2").unwrap().is_none());
        assert_eq!(archive.count().unwrap(), 1);
    }

    #[test]
    fn test_unsealed_report_rejected() {
        let archive = ReportArchive::open(None).unwrap();
        let report = ErrorReport::open("op-open", "tester");
        assert!(archive.save(&report).is_err());
        assert_eq!(archive.count().unwrap(), 0);
    }

    #[test]
    fn test_prune() {
        let archive = ReportArchive::open(None).unwrap();

        let mut old = sealed("old", Outcome::Failed);
        old.sealed_at = Some(Utc::now() - chrono::Duration::days(30));
        archive.save(&old).unwrap();
        archive.save(&sealed("new", Outcome::Succeeded)).unwrap();

        let deleted = archive
            .prune_older_than(Utc::now() - chrono::Duration::days(7))
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining: Vec<String> = archive
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|r| r.operation_id)
            .collect();
        assert_eq!(remaining, vec!["new"]);
    }
}
