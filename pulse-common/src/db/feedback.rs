//! Feedback row operations

use crate::error::{Error, Result};
use crate::models::Feedback;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp in feedback row: {e}")))
}

pub(crate) fn map_row(row: &SqliteRow) -> Result<Feedback> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Bad feedback id: {e}")))?;
    let meta_str: String = row.get("meta");
    let meta: BTreeMap<String, Value> = serde_json::from_str(&meta_str).unwrap_or_default();
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Feedback {
        id,
        source: row.get("source"),
        customer_id: row.get("customer_id"),
        text: row.get("text"),
        normalized_text: row.get("normalized_text"),
        detected_language: row.get("detected_language"),
        meta,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert one feedback row, retrying transient contention.
pub async fn insert(pool: &SqlitePool, feedback: &Feedback) -> Result<()> {
    crate::db::with_retry("feedback insert", || async {
        let mut tx = pool.begin().await?;
        insert_tx(&mut tx, feedback).await?;
        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Insert one feedback row inside an open transaction (batch path).
pub async fn insert_tx(tx: &mut Transaction<'_, Sqlite>, feedback: &Feedback) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO feedback (id, source, customer_id, text, normalized_text,
                              detected_language, meta, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(feedback.id.to_string())
    .bind(&feedback.source)
    .bind(&feedback.customer_id)
    .bind(&feedback.text)
    .bind(&feedback.normalized_text)
    .bind(&feedback.detected_language)
    .bind(serde_json::to_string(&feedback.meta).unwrap_or_else(|_| "{}".to_string()))
    .bind(feedback.created_at.to_rfc3339())
    .bind(feedback.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Load one feedback by id.
pub async fn load_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Feedback>> {
    let row = sqlx::query("SELECT * FROM feedback WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(map_row).transpose()
}

/// Persist normalisation results computed by the ingest stage.
pub async fn update_normalization(
    pool: &SqlitePool,
    id: Uuid,
    normalized_text: &str,
    detected_language: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE feedback
        SET normalized_text = ?, detected_language = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(normalized_text)
    .bind(detected_language)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Count feedback created in the last 24 hours.
pub async fn count_recent_24h(pool: &SqlitePool) -> Result<i64> {
    let cutoff = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE created_at >= ?")
        .bind(cutoff)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Count feedback older than the cutoff, for cleanup dry runs.
pub async fn count_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE created_at < ?")
        .bind(cutoff.to_rfc3339())
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Delete feedback older than the cutoff. Annotations cascade.
pub async fn delete_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM feedback WHERE created_at < ?")
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn test_insert_and_load() {
        let pool = connect_memory().await.unwrap();

        let f = Feedback::new("website".into(), "Great product!".into(), Some("c1".into()));
        insert(&pool, &f).await.unwrap();

        let loaded = load_by_id(&pool, f.id).await.unwrap().unwrap();
        assert_eq!(loaded.text, "Great product!");
        assert_eq!(loaded.source, "website");
        assert_eq!(loaded.customer_id.as_deref(), Some("c1"));
        assert!(loaded.normalized_text.is_none());
    }

    #[tokio::test]
    async fn test_update_normalization() {
        let pool = connect_memory().await.unwrap();

        let f = Feedback::new("api".into(), "  LOUD   text  ".into(), None);
        insert(&pool, &f).await.unwrap();

        update_normalization(&pool, f.id, "loud text", Some("en"))
            .await
            .unwrap();

        let loaded = load_by_id(&pool, f.id).await.unwrap().unwrap();
        assert_eq!(loaded.normalized_text.as_deref(), Some("loud text"));
        assert_eq!(loaded.detected_language.as_deref(), Some("en"));
        assert!(loaded.updated_at >= loaded.created_at);
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let pool = connect_memory().await.unwrap();

        let f = Feedback::new("api".into(), "old one".into(), None);
        insert(&pool, &f).await.unwrap();

        let deleted = delete_older_than(&pool, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let pool = connect_memory().await.unwrap();

        let f = Feedback::new("api".into(), "once".into(), None);
        insert(&pool, &f).await.unwrap();
        assert!(insert(&pool, &f).await.is_err());
    }
}
