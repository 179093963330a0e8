//! Enrichment pipeline stages
//!
//! Four cooperating stages, one per queue: ingest → annotate → cluster →
//! reports. Each stage is idempotent on replay and cascades by enqueuing
//! the next stage for the items it processed. Ordering holds per feedback
//! identifier; across items nothing is guaranteed.

pub mod annotate;
pub mod cluster;
pub mod ingest;
pub mod reports;

use serde::Serialize;

/// Per-stage outcome counters, logged and merged into job results.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StageSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}
