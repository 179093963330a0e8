//! Batch row operations

use crate::error::{Error, Result};
use crate::models::{Batch, BatchStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp in batch row: {e}")))
}

fn map_row(row: &SqliteRow) -> Result<Batch> {
    let id_str: String = row.get("id");
    let id =
        Uuid::parse_str(&id_str).map_err(|e| Error::Internal(format!("Bad batch id: {e}")))?;
    let status_str: String = row.get("status");
    let status = BatchStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown batch status {status_str}")))?;
    let received_at: String = row.get("received_at");
    let job_id = row
        .get::<Option<String>, _>("job_id")
        .and_then(|s| Uuid::parse_str(&s).ok());
    let completed_at = row
        .get::<Option<String>, _>("completed_at")
        .map(|s| parse_timestamp(&s))
        .transpose()?;

    Ok(Batch {
        id,
        source: row.get("source"),
        received_at: parse_timestamp(&received_at)?,
        processed_count: row.get("processed_count"),
        created_count: row.get("created_count"),
        duplicate_count: row.get("duplicate_count"),
        error_count: row.get("error_count"),
        skipped_non_english_count: row.get("skipped_non_english_count"),
        job_id,
        status,
        completed_at,
    })
}

pub async fn insert(pool: &SqlitePool, batch: &Batch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batch (id, source, received_at, processed_count, created_count,
                           duplicate_count, error_count, skipped_non_english_count,
                           job_id, status, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.source)
    .bind(batch.received_at.to_rfc3339())
    .bind(batch.processed_count)
    .bind(batch.created_count)
    .bind(batch.duplicate_count)
    .bind(batch.error_count)
    .bind(batch.skipped_non_english_count)
    .bind(batch.job_id.map(|id| id.to_string()))
    .bind(batch.status.as_str())
    .bind(batch.completed_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batch WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_row).transpose()
}

pub async fn set_status(pool: &SqlitePool, id: Uuid, status: BatchStatus) -> Result<()> {
    let completed_at = match status {
        BatchStatus::Completed | BatchStatus::Failed => Some(Utc::now().to_rfc3339()),
        _ => None,
    };
    sqlx::query("UPDATE batch SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?")
        .bind(status.as_str())
        .bind(completed_at)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the skip count computed by the ingest stage. Absolute, so a
/// replayed job converges instead of double counting.
pub async fn set_skipped_non_english(pool: &SqlitePool, id: Uuid, count: i64) -> Result<()> {
    sqlx::query("UPDATE batch SET skipped_non_english_count = ? WHERE id = ?")
        .bind(count)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_job(pool: &SqlitePool, id: Uuid, job_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE batch SET job_id = ? WHERE id = ?")
        .bind(job_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn test_insert_and_complete() {
        let pool = connect_memory().await.unwrap();
        let mut b = Batch::new("csv_upload".into());
        b.created_count = 3;
        b.duplicate_count = 1;
        insert(&pool, &b).await.unwrap();

        set_status(&pool, b.id, BatchStatus::Completed).await.unwrap();

        let loaded = load_by_id(&pool, b.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.created_count, 3);
        assert_eq!(loaded.duplicate_count, 1);
    }
}
