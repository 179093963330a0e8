//! Annotation row operations
//!
//! The `feedback_id` UNIQUE constraint keeps one live annotation per
//! feedback; every write is an UPSERT so replayed jobs converge on the
//! same row.

use crate::error::{Error, Result};
use crate::models::Annotation;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp in annotation row: {e}")))
}

pub(crate) fn map_row(row: &SqliteRow) -> Result<Annotation> {
    let feedback_id_str: String = row.get("feedback_id");
    let feedback_id = Uuid::parse_str(&feedback_id_str)
        .map_err(|e| Error::Internal(format!("Bad feedback id on annotation: {e}")))?;
    let embedding: Option<Vec<f32>> = row
        .get::<Option<String>, _>("embedding")
        .and_then(|s| serde_json::from_str(&s).ok());
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Annotation {
        id: row.get("id"),
        feedback_id,
        sentiment: row.get("sentiment"),
        sentiment_score: row.get("sentiment_score"),
        topic_id: row.get("topic_id"),
        toxicity_score: row.get("toxicity_score"),
        embedding,
        model_version: row.get("model_version"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Write the sentiment/toxicity portion of an annotation. Creates the row
/// on first annotation, updates it on replay; the topic assignment and
/// embedding set by the cluster stage are left untouched on update.
pub async fn upsert_scores(
    pool: &SqlitePool,
    feedback_id: Uuid,
    sentiment: i64,
    sentiment_score: f64,
    toxicity_score: Option<f64>,
    model_version: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO nlp_annotation (feedback_id, sentiment, sentiment_score,
                                    toxicity_score, model_version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(feedback_id) DO UPDATE SET
            sentiment = excluded.sentiment,
            sentiment_score = excluded.sentiment_score,
            toxicity_score = excluded.toxicity_score,
            model_version = excluded.model_version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(feedback_id.to_string())
    .bind(sentiment)
    .bind(sentiment_score)
    .bind(toxicity_score)
    .bind(model_version)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the embedding computed by the cluster stage.
pub async fn set_embedding(pool: &SqlitePool, feedback_id: Uuid, embedding: &[f32]) -> Result<()> {
    let serialized = serde_json::to_string(embedding)
        .map_err(|e| Error::Internal(format!("Embedding serialisation failed: {e}")))?;
    let result = sqlx::query(
        "UPDATE nlp_annotation SET embedding = ?, updated_at = ? WHERE feedback_id = ?",
    )
    .bind(serialized)
    .bind(Utc::now().to_rfc3339())
    .bind(feedback_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "No annotation for feedback {feedback_id}"
        )));
    }
    Ok(())
}

/// Assign a topic. Reassignment updates the existing row, never creates a
/// duplicate.
pub async fn set_topic(pool: &SqlitePool, feedback_id: Uuid, topic_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE nlp_annotation SET topic_id = ?, updated_at = ? WHERE feedback_id = ?",
    )
    .bind(topic_id)
    .bind(Utc::now().to_rfc3339())
    .bind(feedback_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "No annotation for feedback {feedback_id}"
        )));
    }
    Ok(())
}

/// Transactional topic update used by the admin reassignment path.
/// Returns the previous topic assignment, if any.
pub async fn set_topic_tx(
    tx: &mut Transaction<'_, Sqlite>,
    feedback_id: Uuid,
    topic_id: i64,
) -> Result<Option<i64>> {
    let prior: Option<i64> =
        sqlx::query_scalar("SELECT topic_id FROM nlp_annotation WHERE feedback_id = ?")
            .bind(feedback_id.to_string())
            .fetch_optional(&mut **tx)
            .await?
            .flatten();

    let result = sqlx::query(
        "UPDATE nlp_annotation SET topic_id = ?, updated_at = ? WHERE feedback_id = ?",
    )
    .bind(topic_id)
    .bind(Utc::now().to_rfc3339())
    .bind(feedback_id.to_string())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "No annotation for feedback {feedback_id}"
        )));
    }
    Ok(prior)
}

/// Load the live annotation for a feedback.
pub async fn load_for_feedback(pool: &SqlitePool, feedback_id: Uuid) -> Result<Option<Annotation>> {
    let row = sqlx::query("SELECT * FROM nlp_annotation WHERE feedback_id = ?")
        .bind(feedback_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(map_row).transpose()
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nlp_annotation")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_memory, feedback};
    use crate::models::Feedback;

    async fn seed_feedback(pool: &SqlitePool) -> Uuid {
        let f = Feedback::new("api".into(), "works well".into(), None);
        feedback::insert(pool, &f).await.unwrap();
        f.id
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_single_row() {
        let pool = connect_memory().await.unwrap();
        let fid = seed_feedback(&pool).await;

        upsert_scores(&pool, fid, 1, 0.8, Some(0.05), "lexicon-v1")
            .await
            .unwrap();
        // Replay with fresh scores: same row, new values
        upsert_scores(&pool, fid, -1, -0.4, Some(0.2), "lexicon-v1")
            .await
            .unwrap();

        assert_eq!(count(&pool).await.unwrap(), 1);
        let a = load_for_feedback(&pool, fid).await.unwrap().unwrap();
        assert_eq!(a.sentiment, Some(-1));
        assert_eq!(a.sentiment_score, Some(-0.4));
    }

    #[tokio::test]
    async fn test_set_topic_requires_annotation() {
        let pool = connect_memory().await.unwrap();
        let fid = seed_feedback(&pool).await;

        assert!(matches!(
            set_topic(&pool, fid, 1).await,
            Err(Error::NotFound(_))
        ));

        upsert_scores(&pool, fid, 0, 0.0, None, "lexicon-v1")
            .await
            .unwrap();
        let tid = crate::db::topics::create(&pool, "billing", &["invoice".into()], "system")
            .await
            .unwrap();
        set_topic(&pool, fid, tid).await.unwrap();

        let a = load_for_feedback(&pool, fid).await.unwrap().unwrap();
        assert_eq!(a.topic_id, Some(tid));
    }

    #[tokio::test]
    async fn test_embedding_round_trip() {
        let pool = connect_memory().await.unwrap();
        let fid = seed_feedback(&pool).await;
        upsert_scores(&pool, fid, 1, 0.5, None, "lexicon-v1")
            .await
            .unwrap();

        set_embedding(&pool, fid, &[0.1, 0.2, 0.3]).await.unwrap();
        let a = load_for_feedback(&pool, fid).await.unwrap().unwrap();
        assert_eq!(a.embedding.unwrap().len(), 3);
    }
}
