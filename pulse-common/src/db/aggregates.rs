//! The `daily_feedback_aggregates` rollup table
//!
//! Stands in for the materialised view of the analytics layer: refreshed
//! after admin mutations and by the reports stage, read by the daily
//! rollup endpoints and the analytics export. Readers tolerate staleness
//! up to one refresh period.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// One day's precomputed rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: String,
    pub total_feedback: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment_score: Option<f64>,
    pub avg_toxicity_score: Option<f64>,
    pub unique_customers: i64,
    pub unique_topics: i64,
    pub top_sources: String,
}

fn map_row(row: &SqliteRow) -> DailyAggregate {
    DailyAggregate {
        date: row.get("date"),
        total_feedback: row.get("total_feedback"),
        positive_count: row.get("positive_count"),
        neutral_count: row.get("neutral_count"),
        negative_count: row.get("negative_count"),
        avg_sentiment_score: row.get("avg_sentiment_score"),
        avg_toxicity_score: row.get("avg_toxicity_score"),
        unique_customers: row.get("unique_customers"),
        unique_topics: row.get("unique_topics"),
        top_sources: row.get("top_sources"),
    }
}

/// Recompute the whole table from the base tables in one transaction,
/// retrying transient contention.
pub async fn refresh(pool: &SqlitePool) -> Result<()> {
    crate::db::with_retry("aggregates refresh", || refresh_once(pool)).await
}

async fn refresh_once(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = Utc::now().to_rfc3339();

    sqlx::query("DELETE FROM daily_feedback_aggregates")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO daily_feedback_aggregates
            (date, total_feedback, positive_count, neutral_count, negative_count,
             avg_sentiment_score, avg_toxicity_score, unique_customers,
             unique_topics, top_sources, refreshed_at)
        SELECT
            date(f.created_at) AS day,
            COUNT(*),
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END),
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END),
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END),
            AVG(na.sentiment_score),
            AVG(na.toxicity_score),
            COUNT(DISTINCT f.customer_id),
            COUNT(DISTINCT na.topic_id),
            '',
            ?
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        GROUP BY day
        "#,
    )
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    // Top three sources per day, highest volume first
    let source_rows = sqlx::query(
        r#"
        SELECT date(created_at) AS day, source, COUNT(*) AS n
        FROM feedback
        GROUP BY day, source
        ORDER BY day, n DESC, source
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let mut per_day: HashMap<String, Vec<String>> = HashMap::new();
    for row in &source_rows {
        let day: String = row.get("day");
        let source: String = row.get("source");
        let entry = per_day.entry(day).or_default();
        if entry.len() < 3 {
            entry.push(source);
        }
    }

    for (day, sources) in per_day {
        sqlx::query("UPDATE daily_feedback_aggregates SET top_sources = ? WHERE date = ?")
            .bind(sources.join(","))
            .bind(day)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Paginated read, newest day first, optionally bounded by a date range
/// (inclusive `YYYY-MM-DD` bounds).
pub async fn read_page(
    pool: &SqlitePool,
    start_date: Option<&str>,
    end_date: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<DailyAggregate>, i64)> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM daily_feedback_aggregates
        WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT * FROM daily_feedback_aggregates
        WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
        ORDER BY date DESC
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((rows.iter().map(map_row).collect(), total))
}

/// Timestamp of the last refresh, if the table has ever been populated.
pub async fn last_refreshed(pool: &SqlitePool) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT MAX(refreshed_at) FROM daily_feedback_aggregates")
            .fetch_one(pool)
            .await?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Bad refresh timestamp: {e}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{annotations, connect_memory, feedback};
    use crate::models::Feedback;

    #[tokio::test]
    async fn test_refresh_rolls_up_by_day() {
        let pool = connect_memory().await.unwrap();

        for (text, sentiment) in [("love it", 1), ("hate it", -1), ("it is fine", 0)] {
            let f = Feedback::new("website".into(), text.into(), Some("c1".into()));
            feedback::insert(&pool, &f).await.unwrap();
            annotations::upsert_scores(&pool, f.id, sentiment, sentiment as f64, None, "lexicon-v1")
                .await
                .unwrap();
        }

        refresh(&pool).await.unwrap();

        let (page, total) = read_page(&pool, None, None, 30, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].total_feedback, 3);
        assert_eq!(page[0].positive_count, 1);
        assert_eq!(page[0].negative_count, 1);
        assert_eq!(page[0].neutral_count, 1);
        assert_eq!(page[0].top_sources, "website");
        assert!(last_refreshed(&pool).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        let f = Feedback::new("api".into(), "solid".into(), None);
        feedback::insert(&pool, &f).await.unwrap();

        refresh(&pool).await.unwrap();
        refresh(&pool).await.unwrap();

        let (_, total) = read_page(&pool, None, None, 30, 0).await.unwrap();
        assert_eq!(total, 1);
    }
}
