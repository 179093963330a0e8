//! Online topic assignment
//!
//! Each clustered feedback is matched against existing topic centroids;
//! a close enough centroid wins, otherwise the item stays in the
//! unassigned pool (annotations with an embedding but no topic). Once the
//! pool is large enough, a new topic is spawned with a label synthesised
//! from the pool's top keywords and the pool is folded into it.

use crate::services::keywords;
use pulse_common::db::{annotations, topics};
use pulse_common::error::{Error, Result};
use pulse_common::models::UNASSIGNED_TOPIC_LABEL;
use pulse_common::vector::{cosine_similarity, VectorStore};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Minimum cosine similarity to an existing centroid for assignment.
pub const SIMILARITY_THRESHOLD: f32 = 0.70;

/// Unassigned-pool size that triggers spawning a new topic.
pub const POOL_SPAWN_THRESHOLD: i64 = 50;

/// Maximum keywords kept on a synthesised topic.
const MAX_TOPIC_KEYWORDS: usize = 15;

/// Find the nearest existing topic within the similarity threshold.
pub async fn nearest_topic(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    embedding: &[f32],
) -> Result<Option<i64>> {
    let mut best: Option<(f32, i64)> = None;

    for topic in topics::list_all(pool).await? {
        if topic.label == UNASSIGNED_TOPIC_LABEL {
            continue;
        }
        let Some(center) = store.topic_centroid(topic.id).await? else {
            continue;
        };
        let similarity = cosine_similarity(embedding, &center);
        if similarity >= SIMILARITY_THRESHOLD {
            match best {
                Some((s, _)) if s >= similarity => {}
                _ => best = Some((similarity, topic.id)),
            }
        }
    }

    Ok(best.map(|(_, id)| id))
}

struct PoolEntry {
    feedback_id: Uuid,
    text: String,
}

async fn load_unassigned_pool(pool: &SqlitePool) -> Result<Vec<PoolEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT na.feedback_id, COALESCE(f.normalized_text, f.text) AS text
        FROM nlp_annotation na
        JOIN feedback f ON f.id = na.feedback_id
        WHERE na.topic_id IS NULL AND na.embedding IS NOT NULL
        ORDER BY na.updated_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id_str: String = row.get("feedback_id");
            let feedback_id = Uuid::parse_str(&id_str)
                .map_err(|e| Error::Internal(format!("Bad feedback id: {e}")))?;
            Ok(PoolEntry {
                feedback_id,
                text: row.get("text"),
            })
        })
        .collect()
}

/// Spawn a topic from the unassigned pool once it is large enough.
/// Returns the new topic id, or `None` when the pool is still small.
/// Idempotent: assigning the pool empties it, so a replay finds nothing
/// to do.
pub async fn maybe_spawn_topic(pool: &SqlitePool, threshold: i64) -> Result<Option<i64>> {
    let entries = load_unassigned_pool(pool).await?;
    if (entries.len() as i64) < threshold {
        return Ok(None);
    }

    let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
    let top = keywords::top_keywords(&texts, MAX_TOPIC_KEYWORDS);
    let label = keywords::synthesize_label(&top);

    let topic_id = topics::create(pool, &label, &top, "clustering").await?;
    tracing::info!(
        topic_id,
        label = %label,
        pool_size = entries.len(),
        "Spawned topic from unassigned pool"
    );

    for entry in &entries {
        annotations::set_topic(pool, entry.feedback_id, topic_id).await?;
    }

    Ok(Some(topic_id))
}
