//! Cluster stage
//!
//! Embeds each feedback, upserts the vector into the store, and assigns
//! the nearest topic within the similarity threshold. Items with no close
//! topic stay in the unassigned pool; a large enough pool spawns a new
//! topic. Cascades a reports job covering the batch's time window.

use super::StageSummary;
use crate::context::WorkerContext;
use crate::services::{clustering, embedding};
use pulse_common::db::{annotations, feedback};
use pulse_common::error::Result;
use pulse_common::queue::{JobPayload, QUEUE_REPORTS};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run(
    ctx: &WorkerContext,
    batch_id: Uuid,
    feedback_ids: &[Uuid],
    _source: &str,
) -> Result<StageSummary> {
    info!(batch_id = %batch_id, items = feedback_ids.len(), "Cluster stage started");

    let mut summary = StageSummary::default();
    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    for id in feedback_ids {
        let Some(row) = feedback::load_by_id(&ctx.pool, *id).await? else {
            warn!(feedback_id = %id, "Feedback row missing during cluster stage");
            summary.failed += 1;
            continue;
        };

        if annotations::load_for_feedback(&ctx.pool, *id).await?.is_none() {
            warn!(feedback_id = %id, "No annotation to cluster, skipping row");
            summary.failed += 1;
            continue;
        }

        let body = row.normalized_text.as_deref().unwrap_or(&row.text);
        let vector = embedding::embed(body);
        ctx.vector.upsert(*id, &vector).await?;

        if let Some(topic_id) = clustering::nearest_topic(&ctx.pool, ctx.vector.as_ref(), &vector).await? {
            annotations::set_topic(&ctx.pool, *id, topic_id).await?;
        }

        window = Some(match window {
            None => (row.created_at, row.created_at),
            Some((lo, hi)) => (lo.min(row.created_at), hi.max(row.created_at)),
        });
        summary.processed += 1;
    }

    clustering::maybe_spawn_topic(&ctx.pool, clustering::POOL_SPAWN_THRESHOLD).await?;

    let (start, end) = window.unwrap_or_else(|| {
        let now = Utc::now();
        (now, now)
    });
    ctx.queue
        .enqueue(QUEUE_REPORTS, &JobPayload::DateWindow { batch_id, start, end })
        .await?;

    info!(
        batch_id = %batch_id,
        processed = summary.processed,
        failed = summary.failed,
        "Cluster stage complete"
    );
    Ok(summary)
}
