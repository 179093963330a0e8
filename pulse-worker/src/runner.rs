//! Queue consumer pools
//!
//! One small pool of consumer tasks per named queue. Each consumer claims
//! a job under the visibility timeout, dispatches it to its stage, and
//! acknowledges, retries with backoff, or dead-letters depending on the
//! outcome. Cancellation stops claiming new work; a job in flight either
//! commits or rolls back on its own.

use crate::context::WorkerContext;
use crate::stages;
use pulse_common::error::Result;
use pulse_common::queue::{
    Job, JobPayload, ALL_QUEUES, DEFAULT_VISIBILITY_SECS, QUEUE_ANNOTATE, QUEUE_CLUSTER,
    QUEUE_INGEST, QUEUE_REPORTS,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Consumers per queue.
pub const CONSUMERS_PER_QUEUE: usize = 2;

/// Idle poll interval when a queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Dispatch one claimed job to its stage.
pub async fn dispatch(ctx: &WorkerContext, job: &Job) -> Result<stages::StageSummary> {
    match (&job.queue[..], &job.payload) {
        (QUEUE_INGEST, JobPayload::Batch { batch_id, feedback_ids, source }) => {
            stages::ingest::run(ctx, *batch_id, feedback_ids, source).await
        }
        (QUEUE_ANNOTATE, JobPayload::Batch { batch_id, feedback_ids, source }) => {
            stages::annotate::run(ctx, *batch_id, feedback_ids, source).await
        }
        (QUEUE_CLUSTER, JobPayload::Batch { batch_id, feedback_ids, source }) => {
            stages::cluster::run(ctx, *batch_id, feedback_ids, source).await
        }
        (QUEUE_REPORTS, JobPayload::DateWindow { batch_id, start, end }) => {
            stages::reports::run(ctx, *batch_id, *start, *end).await
        }
        _ => Err(pulse_common::Error::Internal(format!(
            "Job {} carries a payload its queue '{}' does not accept",
            job.id, job.queue
        ))),
    }
}

async fn consume_loop(ctx: WorkerContext, queue_name: &'static str, cancel: CancellationToken) {
    info!(queue = queue_name, "Consumer started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let claimed = match ctx.queue.dequeue(queue_name, DEFAULT_VISIBILITY_SECS).await {
            Ok(job) => job,
            Err(e) => {
                error!(queue = queue_name, error = %e, "Dequeue failed");
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        let Some(job) = claimed else {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_POLL) => {}
                _ = cancel.cancelled() => break,
            }
            continue;
        };

        match dispatch(&ctx, &job).await {
            Ok(summary) => {
                if let Err(e) = ctx.queue.complete(job.id).await {
                    error!(job_id = %job.id, error = %e, "Failed to acknowledge job");
                }
                ctx.metrics
                    .increment("jobs_processed_total", &[("queue", queue_name)])
                    .await;
                if summary.failed > 0 {
                    ctx.metrics
                        .add("job_rows_failed_total", &[("queue", queue_name)], summary.failed as u64)
                        .await;
                }
            }
            Err(e) => {
                ctx.metrics
                    .increment("jobs_failed_total", &[("queue", queue_name)])
                    .await;
                match ctx.queue.retry_or_bury(&job, &e.to_string()).await {
                    Ok(true) => {
                        ctx.metrics
                            .increment("jobs_dead_lettered_total", &[("queue", queue_name)])
                            .await;
                    }
                    Ok(false) => {}
                    Err(requeue_err) => {
                        error!(job_id = %job.id, error = %requeue_err, "Failed to requeue job");
                    }
                }
            }
        }
    }

    info!(queue = queue_name, "Consumer stopped");
}

/// Spawn the consumer pools for every queue. Tasks stop claiming work
/// once `cancel` fires.
pub fn spawn_consumers(ctx: &WorkerContext, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for queue_name in ALL_QUEUES {
        for _ in 0..CONSUMERS_PER_QUEUE {
            handles.push(tokio::spawn(consume_loop(
                ctx.clone(),
                queue_name,
                cancel.clone(),
            )));
        }
    }
    handles
}
