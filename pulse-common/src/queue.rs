//! Job queue adapter
//!
//! Four named queues over the `job` table with FIFO claim order,
//! at-least-once delivery via visibility timeouts, and a dead-letter
//! status once the attempt cap is exhausted. The queue is durable across
//! restarts because it shares the primary store.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

pub const QUEUE_INGEST: &str = "ingest";
pub const QUEUE_ANNOTATE: &str = "annotate";
pub const QUEUE_CLUSTER: &str = "cluster";
pub const QUEUE_REPORTS: &str = "reports";

pub const ALL_QUEUES: [&str; 4] = [QUEUE_INGEST, QUEUE_ANNOTATE, QUEUE_CLUSTER, QUEUE_REPORTS];

/// Default visibility timeout before an unacknowledged job is redelivered.
pub const DEFAULT_VISIBILITY_SECS: i64 = 120;

/// Attempts allowed before a job is dead-lettered.
pub const MAX_ATTEMPTS: i64 = 5;

/// Typed job payloads. Batch payloads drive the enrichment stages; the
/// reports stage receives the window its batch covered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Batch {
        batch_id: Uuid,
        feedback_ids: Vec<Uuid>,
        source: String,
    },
    DateWindow {
        batch_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// One claimed or queued job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub payload: JobPayload,
    pub attempts: i64,
}

/// Per-queue statistics for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub dead: i64,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a job on a named queue. Returns the job id.
    pub async fn enqueue(&self, queue: &str, payload: &JobPayload) -> Result<Uuid> {
        if !ALL_QUEUES.contains(&queue) {
            return Err(Error::Validation(format!("Unknown queue '{queue}'")));
        }

        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let serialized = serde_json::to_string(payload)
            .map_err(|e| Error::Internal(format!("Payload serialisation failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO job (id, queue, payload, attempts, status, enqueued_at, visible_at, updated_at)
            VALUES (?, ?, ?, 0, 'queued', ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(queue)
        .bind(serialized)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(job_id = %id, queue, "Enqueued job");
        Ok(id)
    }

    /// Claim the oldest visible job on a queue, stamping a visibility
    /// deadline. Returns `None` when the queue is empty. Claiming bumps
    /// the attempt counter so a crashed consumer counts as an attempt.
    pub async fn dequeue(&self, queue: &str, visibility_secs: i64) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, payload, attempts FROM job
            WHERE queue = ?
              AND (status = 'queued' OR (status = 'running' AND visible_at <= ?))
            ORDER BY enqueued_at, id
            LIMIT 1
            "#,
        )
        .bind(queue)
        .bind(now.to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id_str: String = row.get("id");
        let id =
            Uuid::parse_str(&id_str).map_err(|e| Error::Internal(format!("Bad job id: {e}")))?;
        let payload_str: String = row.get("payload");
        let payload: JobPayload = serde_json::from_str(&payload_str)
            .map_err(|e| Error::Internal(format!("Bad job payload: {e}")))?;
        let attempts: i64 = row.get("attempts");

        let deadline = now + ChronoDuration::seconds(visibility_secs);
        sqlx::query(
            "UPDATE job SET status = 'running', attempts = attempts + 1, visible_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(deadline.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Job {
            id,
            queue: queue.to_string(),
            payload,
            attempts: attempts + 1,
        }))
    }

    /// Acknowledge a completed job.
    pub async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE job SET status = 'done', updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Put a failed job back with a backoff delay, or dead-letter it if
    /// its attempts are exhausted. Returns true when the job was buried.
    pub async fn retry_or_bury(&self, job: &Job, error: &str) -> Result<bool> {
        let now = Utc::now();

        if job.attempts >= MAX_ATTEMPTS {
            sqlx::query(
                "UPDATE job SET status = 'dead', last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await?;
            tracing::error!(
                job_id = %job.id,
                queue = %job.queue,
                attempts = job.attempts,
                error,
                "Job moved to dead letter queue"
            );
            return Ok(true);
        }

        // Exponential redelivery delay: 2^attempts seconds, capped at the
        // visibility timeout.
        let delay = (1_i64 << job.attempts.min(7)).min(DEFAULT_VISIBILITY_SECS);
        let visible_at = now + ChronoDuration::seconds(delay);

        sqlx::query(
            "UPDATE job SET status = 'queued', visible_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(visible_at.to_rfc3339())
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            job_id = %job.id,
            queue = %job.queue,
            attempts = job.attempts,
            retry_in_secs = delay,
            error,
            "Job re-enqueued after failure"
        );
        Ok(false)
    }

    /// Status of one job, for the upload status surface.
    pub async fn status(&self, job_id: Uuid) -> Result<Option<String>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM job WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    /// Per-queue counts for the admin stats endpoint.
    pub async fn stats(&self) -> Result<HashMap<String, QueueStats>> {
        let rows = sqlx::query("SELECT queue, status, COUNT(*) AS n FROM job GROUP BY queue, status")
            .fetch_all(&self.pool)
            .await?;

        let mut out: HashMap<String, QueueStats> = ALL_QUEUES
            .iter()
            .map(|q| {
                (
                    q.to_string(),
                    QueueStats {
                        queued: 0,
                        running: 0,
                        done: 0,
                        dead: 0,
                    },
                )
            })
            .collect();

        for row in rows {
            let queue: String = row.get("queue");
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            let entry = out.entry(queue).or_insert(QueueStats {
                queued: 0,
                running: 0,
                done: 0,
                dead: 0,
            });
            match status.as_str() {
                "queued" => entry.queued = n,
                "running" => entry.running = n,
                "done" => entry.done = n,
                "dead" => entry.dead = n,
                _ => {}
            }
        }

        Ok(out)
    }

    /// Drop all jobs from a queue regardless of status.
    pub async fn clear(&self, queue: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
