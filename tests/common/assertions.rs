/// Assertion helpers for sealed error reports
use anyhow::Result;
use registry_resilience::recovery::{EngineState, EntryOutcome};
use registry_resilience::{ErrorReport, Outcome};

/// Assert the sequence of (from, to) transitions recorded in a report
pub fn assert_transitions(report: &ErrorReport, expected: &[(EngineState, EngineState)]) -> Result<()> {
    let actual: Vec<(EngineState, EngineState)> =
        report.entries.iter().map(|e| (e.from, e.to)).collect();

    anyhow::ensure!(
        actual == expected,
        "Unexpected transitions for {}:\n  expected {:?}\n  actual   {:?}",
        report.operation_id,
        expected,
        actual
    );

    Ok(())
}

/// Assert a report is sealed with the given outcome
pub fn assert_sealed(report: &ErrorReport, outcome: Outcome) -> Result<()> {
    anyhow::ensure!(
        report.is_sealed(),
        "Report {} is not sealed",
        report.operation_id
    );
    anyhow::ensure!(
        report.outcome == Some(outcome),
        "Report {} sealed as {:?}, expected {}",
        report.operation_id,
        report.outcome,
        outcome
    );

    Ok(())
}

/// Number of entries with the given outcome
pub fn count_outcome(report: &ErrorReport, outcome: EntryOutcome) -> usize {
    report.entries.iter().filter(|e| e.outcome == outcome).count()
}
