/// Hot-path benchmarks for the resilience engine
///
/// Measures delay computation, error classification and statistics
/// aggregation over a populated report store.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use registry_resilience::recovery::report::{EngineState, EntryAction, EntryOutcome, ReportEntry};
use registry_resilience::recovery::{next_delay, ReportStore};
use registry_resilience::{
    ClassifiedError, ErrorClassifier, ErrorKind, ErrorReport, Outcome, PatternConfig,
    RegistryError, RetentionPolicy,
};
use std::time::Duration;

fn bench_next_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_delay");
    let base = Duration::from_millis(100);
    let max = Duration::from_secs(30);

    for jitter in [false, true] {
        group.bench_with_input(BenchmarkId::new("jitter", jitter), &jitter, |b, &jitter| {
            b.iter(|| {
                for attempt in 1..=10 {
                    black_box(next_delay(black_box(attempt), base, max, 2.0, jitter));
                }
            })
        });
    }

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let classifier = ErrorClassifier::new();
    let errors = vec![
        RegistryError::Network("connection reset".to_string()),
        RegistryError::MetadataInvalid {
            field: "version".to_string(),
            reason: "not semver".to_string(),
        },
        RegistryError::Other("upstream returned 503 Service Unavailable".to_string()),
        RegistryError::Other("something unexpected".to_string()),
    ];

    c.bench_function("classify_mixed", |b| {
        b.iter(|| {
            for error in &errors {
                black_box(classifier.classify(black_box(error)));
            }
        })
    });
}

fn populated_store(reports: usize) -> ReportStore {
    let store = ReportStore::new(
        RetentionPolicy {
            max_reports: reports,
            max_age: None,
        },
        PatternConfig::default(),
    );

    for i in 0..reports {
        let mut report = ErrorReport::open(format!("op-{}", i), "bench");
        for attempt in 1..=(i % 4) as u32 {
            report.append(
                ReportEntry::new(
                    attempt,
                    EngineState::Attempting,
                    EngineState::WaitingRetry,
                    EntryAction::Attempt,
                    EntryOutcome::Failed,
                )
                .with_error(ClassifiedError::from_kind(ErrorKind::Network)),
            );
        }
        report.seal(if i % 7 == 0 {
            Outcome::Failed
        } else {
            Outcome::Succeeded
        });
        let _ = store.seal(report);
    }

    store
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [1_000usize, 10_000] {
        let store = populated_store(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| black_box(store.aggregate(None)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_next_delay, bench_classify, bench_aggregate);
criterion_main!(benches);
