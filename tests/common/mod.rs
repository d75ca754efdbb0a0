#![allow(dead_code)]

/// Common test utilities shared by the integration tests
///
/// - Stub collaborators with call counters
/// - Scripted operations that fail a fixed number of times
/// - Report assertions

pub mod assertions;
pub mod stubs;

use registry_resilience::recovery::NoopAuditSink;
use registry_resilience::{EngineConfig, ResilienceEngineBuilder, ResilienceEngine};
use std::sync::Arc;

/// Builder preloaded with the fast preset and a silent audit sink
pub fn fast_builder() -> ResilienceEngineBuilder {
    ResilienceEngine::builder()
        .config(EngineConfig::fast())
        .audit_sink(Arc::new(NoopAuditSink))
}
