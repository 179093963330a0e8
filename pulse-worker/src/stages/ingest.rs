//! Ingest stage
//!
//! Consumes raw-upload notifications: verifies the batch rows persisted,
//! applies the canonicalisation the HTTP layer deferred (normalisation and
//! language detection), drops confidently non-English rows when the gate
//! is on, and cascades an annotate job for the surviving items.

use super::StageSummary;
use crate::context::WorkerContext;
use pulse_common::db::{batches, feedback};
use pulse_common::error::Result;
use pulse_common::models::BatchStatus;
use pulse_common::queue::{JobPayload, QUEUE_ANNOTATE};
use pulse_common::text;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run(
    ctx: &WorkerContext,
    batch_id: Uuid,
    feedback_ids: &[Uuid],
    source: &str,
) -> Result<StageSummary> {
    info!(batch_id = %batch_id, items = feedback_ids.len(), "Ingest stage started");
    batches::set_status(&ctx.pool, batch_id, BatchStatus::Processing).await?;

    let mut summary = StageSummary::default();
    let mut to_annotate = Vec::with_capacity(feedback_ids.len());

    for id in feedback_ids {
        let Some(row) = feedback::load_by_id(&ctx.pool, *id).await? else {
            warn!(feedback_id = %id, "Feedback row missing during ingest stage");
            summary.failed += 1;
            continue;
        };

        // Replayed jobs see rows already normalised; recomputing converges
        // on the same values, so no special casing is needed.
        let processed = text::process_text(&row.text, ctx.english_only);
        feedback::update_normalization(
            &ctx.pool,
            *id,
            &processed.normalized,
            processed.detected_language,
        )
        .await?;

        if !processed.should_process {
            summary.skipped += 1;
            continue;
        }

        to_annotate.push(*id);
        summary.processed += 1;
    }

    batches::set_skipped_non_english(&ctx.pool, batch_id, summary.skipped as i64).await?;

    if !to_annotate.is_empty() {
        ctx.queue
            .enqueue(
                QUEUE_ANNOTATE,
                &JobPayload::Batch {
                    batch_id,
                    feedback_ids: to_annotate,
                    source: source.to_string(),
                },
            )
            .await?;
    }

    info!(
        batch_id = %batch_id,
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "Ingest stage complete"
    );
    Ok(summary)
}
