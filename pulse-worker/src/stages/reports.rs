//! Reports stage
//!
//! Final stage of the pipeline: drops analytics cache entries covering
//! the batch's window, refreshes the daily rollup table, and marks the
//! batch complete.

use super::StageSummary;
use crate::context::WorkerContext;
use chrono::{DateTime, Utc};
use pulse_common::db::{aggregates, batches};
use pulse_common::error::Result;
use pulse_common::models::BatchStatus;
use tracing::info;
use uuid::Uuid;

pub async fn run(
    ctx: &WorkerContext,
    batch_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<StageSummary> {
    info!(batch_id = %batch_id, start = %start, end = %end, "Reports stage started");

    // Cache keys hash their parameters, so windows cannot be matched
    // key-by-key; every analytics entry covering any window goes.
    let invalidated = ctx.cache.invalidate_analytics().await;

    aggregates::refresh(&ctx.pool).await?;
    batches::set_status(&ctx.pool, batch_id, BatchStatus::Completed).await?;

    ctx.metrics.increment("batches_completed_total", &[]).await;
    info!(batch_id = %batch_id, invalidated, "Reports stage complete");

    Ok(StageSummary {
        processed: 1,
        ..Default::default()
    })
}
