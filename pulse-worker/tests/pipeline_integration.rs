//! End-to-end pipeline tests
//!
//! Drives batches through all four stages by pumping the queues directly,
//! without the timing variance of the consumer pools.

use pulse_common::cache::Cache;
use pulse_common::config::Settings;
use pulse_common::db::{self, aggregates, annotations, batches, feedback};
use pulse_common::models::{Batch, BatchStatus, Feedback};
use pulse_common::queue::{JobPayload, JobQueue, ALL_QUEUES, QUEUE_INGEST};
use pulse_worker::runner;
use pulse_worker::WorkerContext;
use uuid::Uuid;

async fn test_context() -> WorkerContext {
    let pool = db::connect_memory().await.unwrap();
    let settings = Settings::default();
    WorkerContext::new(pool, Cache::new(), &settings)
}

/// Claim and dispatch jobs until every queue is drained.
async fn pump_until_empty(ctx: &WorkerContext) {
    loop {
        let mut did_work = false;
        for queue_name in ALL_QUEUES {
            while let Some(job) = ctx.queue.dequeue(queue_name, 120).await.unwrap() {
                runner::dispatch(ctx, &job).await.unwrap();
                ctx.queue.complete(job.id).await.unwrap();
                did_work = true;
            }
        }
        if !did_work {
            break;
        }
    }
}

async fn seed_batch(ctx: &WorkerContext, texts: &[&str]) -> (Uuid, Vec<Uuid>) {
    let batch = Batch::new("csv_upload".into());
    batches::insert(&ctx.pool, &batch).await.unwrap();

    let mut ids = Vec::new();
    for text in texts {
        let f = Feedback::new("csv_upload".into(), text.to_string(), Some("c1".into()));
        feedback::insert(&ctx.pool, &f).await.unwrap();
        ids.push(f.id);
    }
    (batch.id, ids)
}

#[tokio::test]
async fn test_full_pipeline_enriches_batch() {
    let ctx = test_context().await;
    let (batch_id, ids) = seed_batch(
        &ctx,
        &["The product is great and works well", "This is terrible and broken"],
    )
    .await;

    let queue = JobQueue::new(ctx.pool.clone());
    queue
        .enqueue(
            QUEUE_INGEST,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();

    pump_until_empty(&ctx).await;

    // Exactly one live annotation per feedback, with sentiment and embedding
    for id in &ids {
        let annotation = annotations::load_for_feedback(&ctx.pool, *id)
            .await
            .unwrap()
            .expect("annotation missing after pipeline");
        assert!(annotation.sentiment.is_some());
        assert!(annotation.embedding.is_some());
        assert_eq!(annotation.model_version.as_deref(), Some("lexicon-v1"));
    }
    assert_eq!(annotations::count(&ctx.pool).await.unwrap(), 2);

    // Normalisation happened
    let first = feedback::load_by_id(&ctx.pool, ids[0]).await.unwrap().unwrap();
    assert!(first.normalized_text.is_some());

    // Batch completed and the rollup table was refreshed
    let batch = batches::load_by_id(&ctx.pool, batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(aggregates::last_refreshed(&ctx.pool).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sentiment_classes_land_as_expected() {
    let ctx = test_context().await;
    let (batch_id, ids) = seed_batch(
        &ctx,
        &["Love it, excellent and reliable", "Awful, worst purchase, total waste"],
    )
    .await;

    ctx.queue
        .enqueue(
            QUEUE_INGEST,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();
    pump_until_empty(&ctx).await;

    let positive = annotations::load_for_feedback(&ctx.pool, ids[0]).await.unwrap().unwrap();
    let negative = annotations::load_for_feedback(&ctx.pool, ids[1]).await.unwrap().unwrap();
    assert_eq!(positive.sentiment, Some(1));
    assert_eq!(negative.sentiment, Some(-1));
}

#[tokio::test]
async fn test_replaying_a_stage_is_idempotent() {
    let ctx = test_context().await;
    let (batch_id, ids) = seed_batch(&ctx, &["The service was great", "Support was helpful"]).await;

    ctx.queue
        .enqueue(
            QUEUE_INGEST,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();
    pump_until_empty(&ctx).await;

    let annotation_count = annotations::count(&ctx.pool).await.unwrap();
    let audit_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topic_audit_log")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();

    // Replay the annotate stage for the same batch
    ctx.queue
        .enqueue(
            pulse_common::queue::QUEUE_ANNOTATE,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();
    pump_until_empty(&ctx).await;

    // No new annotations, no new audit entries
    assert_eq!(annotations::count(&ctx.pool).await.unwrap(), annotation_count);
    let audit_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topic_audit_log")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(audit_after, audit_count);
}

#[tokio::test]
async fn test_non_english_rows_are_skipped() {
    let ctx = test_context().await;
    let (batch_id, ids) = seed_batch(
        &ctx,
        &["The checkout flow is broken", "товар сломался очень плохо"],
    )
    .await;

    ctx.queue
        .enqueue(
            QUEUE_INGEST,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();
    pump_until_empty(&ctx).await;

    // The English row is annotated, the skipped one is not
    assert!(annotations::load_for_feedback(&ctx.pool, ids[0]).await.unwrap().is_some());
    assert!(annotations::load_for_feedback(&ctx.pool, ids[1]).await.unwrap().is_none());

    let batch = batches::load_by_id(&ctx.pool, batch_id).await.unwrap().unwrap();
    assert_eq!(batch.skipped_non_english_count, 1);
}

#[tokio::test]
async fn test_failed_row_does_not_poison_batch() {
    let ctx = test_context().await;
    let (batch_id, mut ids) = seed_batch(&ctx, &["Everything works great"]).await;
    // A feedback id that does not exist
    ids.push(Uuid::new_v4());

    ctx.queue
        .enqueue(
            QUEUE_INGEST,
            &JobPayload::Batch {
                batch_id,
                feedback_ids: ids.clone(),
                source: "csv_upload".into(),
            },
        )
        .await
        .unwrap();
    pump_until_empty(&ctx).await;

    assert!(annotations::load_for_feedback(&ctx.pool, ids[0]).await.unwrap().is_some());
    let batch = batches::load_by_id(&ctx.pool, batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
}
