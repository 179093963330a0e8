//! Vector store adapter
//!
//! Semantic retrieval of feedback by topic/sentiment filter. The default
//! implementation keeps embeddings at rest on the annotation rows and
//! ranks by cosine similarity to the topic centroid; a deployment with a
//! dedicated vector backend swaps in its own implementation of the trait.

use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Cosine similarity of two equal-length vectors; 0.0 when degenerate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mean of a set of vectors. `None` when empty or mismatched.
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    let mut n = 0usize;
    for v in vectors {
        if v.len() != dim {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        n += 1;
    }
    if n == 0 {
        return None;
    }
    for acc in &mut sum {
        *acc /= n as f32;
    }
    Some(sum)
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store (or replace) the embedding for a feedback item.
    async fn upsert(&self, feedback_id: Uuid, embedding: &[f32]) -> Result<()>;

    /// Up to `k` feedback identifiers matching the filters, most relevant
    /// first. Relevance is the implementation's choice.
    async fn query(
        &self,
        topic_id: Option<i64>,
        sentiment: Option<i64>,
        k: usize,
    ) -> Result<Vec<Uuid>>;

    /// Centroid of a topic's stored embeddings, if any exist.
    async fn topic_centroid(&self, topic_id: i64) -> Result<Option<Vec<f32>>>;
}

/// Embeddings stored on the annotation rows of the primary store.
#[derive(Clone)]
pub struct SqlVectorStore {
    pool: SqlitePool,
}

impl SqlVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_candidates(
        &self,
        topic_id: Option<i64>,
        sentiment: Option<i64>,
    ) -> Result<Vec<(Uuid, Option<Vec<f32>>)>> {
        let rows = sqlx::query(
            r#"
            SELECT feedback_id, embedding FROM nlp_annotation
            WHERE (?1 IS NULL OR topic_id = ?1)
              AND (?2 IS NULL OR sentiment = ?2)
            ORDER BY updated_at DESC
            LIMIT 1000
            "#,
        )
        .bind(topic_id)
        .bind(sentiment)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id_str: String = row.get("feedback_id");
                let id = Uuid::parse_str(&id_str)
                    .map_err(|e| Error::Internal(format!("Bad feedback id: {e}")))?;
                let embedding = row
                    .get::<Option<String>, _>("embedding")
                    .and_then(|s| serde_json::from_str(&s).ok());
                Ok((id, embedding))
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for SqlVectorStore {
    async fn upsert(&self, feedback_id: Uuid, embedding: &[f32]) -> Result<()> {
        crate::db::annotations::set_embedding(&self.pool, feedback_id, embedding).await
    }

    async fn query(
        &self,
        topic_id: Option<i64>,
        sentiment: Option<i64>,
        k: usize,
    ) -> Result<Vec<Uuid>> {
        let candidates = self.load_candidates(topic_id, sentiment).await?;

        let reference = match topic_id {
            Some(id) => self.topic_centroid(id).await?,
            None => None,
        };

        match reference {
            Some(center) => {
                let mut scored: Vec<(f32, Uuid)> = candidates
                    .into_iter()
                    .filter_map(|(id, emb)| {
                        emb.map(|e| (cosine_similarity(&e, &center), id))
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                Ok(scored.into_iter().take(k).map(|(_, id)| id).collect())
            }
            // No centroid available: recency order from the SQL
            None => Ok(candidates.into_iter().take(k).map(|(id, _)| id).collect()),
        }
    }

    async fn topic_centroid(&self, topic_id: i64) -> Result<Option<Vec<f32>>> {
        let rows: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT embedding FROM nlp_annotation WHERE topic_id = ? AND embedding IS NOT NULL LIMIT 500",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        let vectors: Vec<Vec<f32>> = rows
            .into_iter()
            .flatten()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();

        Ok(centroid(&vectors))
    }
}
