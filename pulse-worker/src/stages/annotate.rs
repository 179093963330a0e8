//! Annotate stage
//!
//! Scores each feedback with the sentiment/toxicity model and writes one
//! annotation row per feedback under the UPSERT that keeps replays
//! converging on the same state. Cascades a cluster job on completion.

use super::StageSummary;
use crate::context::WorkerContext;
use crate::services::sentiment;
use pulse_common::db::{annotations, feedback};
use pulse_common::error::Result;
use pulse_common::queue::{JobPayload, QUEUE_CLUSTER};
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run(
    ctx: &WorkerContext,
    batch_id: Uuid,
    feedback_ids: &[Uuid],
    source: &str,
) -> Result<StageSummary> {
    info!(batch_id = %batch_id, items = feedback_ids.len(), "Annotate stage started");

    let mut summary = StageSummary::default();
    let mut to_cluster = Vec::with_capacity(feedback_ids.len());

    for id in feedback_ids {
        let Some(row) = feedback::load_by_id(&ctx.pool, *id).await? else {
            warn!(feedback_id = %id, "Feedback row missing during annotate stage");
            summary.failed += 1;
            continue;
        };

        let body = row.normalized_text.as_deref().unwrap_or(&row.text);

        // Transient model failures bubble up and retry the whole job;
        // the UPSERT makes the replay safe for rows already written.
        let result = ctx.sentiment.analyze(body).await?;
        let toxicity = sentiment::toxicity_score(body);

        annotations::upsert_scores(
            &ctx.pool,
            *id,
            result.class,
            result.score,
            toxicity,
            ctx.sentiment.version(),
        )
        .await?;

        to_cluster.push(*id);
        summary.processed += 1;
    }

    if !to_cluster.is_empty() {
        ctx.queue
            .enqueue(
                QUEUE_CLUSTER,
                &JobPayload::Batch {
                    batch_id,
                    feedback_ids: to_cluster,
                    source: source.to_string(),
                },
            )
            .await?;
    }

    info!(
        batch_id = %batch_id,
        processed = summary.processed,
        failed = summary.failed,
        "Annotate stage complete"
    );
    Ok(summary)
}
