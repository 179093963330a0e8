//! Whitelisted read-only rollup queries
//!
//! One typed row struct per rollup shape. Every statement is a fixed
//! projection/aggregation with bound parameters; nothing here concatenates
//! caller input into SQL.

use super::{DateRange, GroupBy};
use crate::error::ApiResult;
use pulse_common::Error;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

fn date_bucket(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::Day => "date(f.created_at)",
        GroupBy::Week => "strftime('%Y-W%W', f.created_at)",
        GroupBy::Month => "strftime('%Y-%m', f.created_at)",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentTrendRow {
    pub period: String,
    pub total_feedback: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment_score: Option<f64>,
    pub avg_toxicity_score: Option<f64>,
}

pub async fn sentiment_trends(
    pool: &SqlitePool,
    range: &DateRange,
    group_by: GroupBy,
) -> ApiResult<Vec<SentimentTrendRow>> {
    let sql = format!(
        r#"
        SELECT
            {bucket} AS period,
            COUNT(*) AS total_feedback,
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END) AS positive_count,
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END) AS neutral_count,
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END) AS negative_count,
            AVG(na.sentiment_score) AS avg_sentiment_score,
            AVG(na.toxicity_score) AS avg_toxicity_score
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE date(f.created_at) BETWEEN ? AND ?
        GROUP BY period
        ORDER BY period DESC
        "#,
        bucket = date_bucket(group_by)
    );

    let rows = sqlx::query(&sql)
        .bind(range.start_str())
        .bind(range.end_str())
        .fetch_all(pool)
        .await
        .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| SentimentTrendRow {
            period: row.get("period"),
            total_feedback: row.get("total_feedback"),
            positive_count: row.get("positive_count"),
            neutral_count: row.get("neutral_count"),
            negative_count: row.get("negative_count"),
            avg_sentiment_score: row.get("avg_sentiment_score"),
            avg_toxicity_score: row.get("avg_toxicity_score"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeTrendRow {
    pub period: String,
    pub total_feedback: i64,
    pub unique_customers: i64,
    pub sources_used: i64,
    pub analyzed_feedback: i64,
    pub analysis_completion_rate: Option<f64>,
}

pub async fn volume_trends(
    pool: &SqlitePool,
    range: &DateRange,
    group_by: GroupBy,
) -> ApiResult<Vec<VolumeTrendRow>> {
    let sql = format!(
        r#"
        SELECT
            {bucket} AS period,
            COUNT(*) AS total_feedback,
            COUNT(DISTINCT f.customer_id) AS unique_customers,
            COUNT(DISTINCT f.source) AS sources_used,
            COUNT(CASE WHEN na.sentiment IS NOT NULL THEN 1 END) AS analyzed_feedback,
            ROUND(COUNT(CASE WHEN na.sentiment IS NOT NULL THEN 1 END) * 100.0
                  / NULLIF(COUNT(*), 0), 2) AS analysis_completion_rate
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE date(f.created_at) BETWEEN ? AND ?
        GROUP BY period
        ORDER BY period DESC
        "#,
        bucket = date_bucket(group_by)
    );

    let rows = sqlx::query(&sql)
        .bind(range.start_str())
        .bind(range.end_str())
        .fetch_all(pool)
        .await
        .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| VolumeTrendRow {
            period: row.get("period"),
            total_feedback: row.get("total_feedback"),
            unique_customers: row.get("unique_customers"),
            sources_used: row.get("sources_used"),
            analyzed_feedback: row.get("analyzed_feedback"),
            analysis_completion_rate: row.get("analysis_completion_rate"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerStatsRow {
    pub customer_id: String,
    pub feedback_count: i64,
    pub sources_used: i64,
    pub first_feedback_date: String,
    pub last_feedback_date: String,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment_score: Option<f64>,
    pub avg_toxicity_score: Option<f64>,
}

pub async fn customer_stats(
    pool: &SqlitePool,
    range: &DateRange,
    min_feedback_count: i64,
) -> ApiResult<Vec<CustomerStatsRow>> {
    let rows = sqlx::query(
        r#"
        SELECT
            f.customer_id,
            COUNT(f.id) AS feedback_count,
            COUNT(DISTINCT f.source) AS sources_used,
            MIN(f.created_at) AS first_feedback_date,
            MAX(f.created_at) AS last_feedback_date,
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END) AS positive_count,
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END) AS neutral_count,
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END) AS negative_count,
            AVG(na.sentiment_score) AS avg_sentiment_score,
            AVG(na.toxicity_score) AS avg_toxicity_score
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE f.customer_id IS NOT NULL
          AND date(f.created_at) BETWEEN ? AND ?
        GROUP BY f.customer_id
        HAVING COUNT(f.id) >= ?
        ORDER BY feedback_count DESC, last_feedback_date DESC
        "#,
    )
    .bind(range.start_str())
    .bind(range.end_str())
    .bind(min_feedback_count)
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| CustomerStatsRow {
            customer_id: row.get("customer_id"),
            feedback_count: row.get("feedback_count"),
            sources_used: row.get("sources_used"),
            first_feedback_date: row.get("first_feedback_date"),
            last_feedback_date: row.get("last_feedback_date"),
            positive_count: row.get("positive_count"),
            neutral_count: row.get("neutral_count"),
            negative_count: row.get("negative_count"),
            avg_sentiment_score: row.get("avg_sentiment_score"),
            avg_toxicity_score: row.get("avg_toxicity_score"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatsRow {
    pub source: String,
    pub feedback_count: i64,
    pub unique_customers: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment_score: Option<f64>,
    pub avg_toxicity_score: Option<f64>,
}

pub async fn source_stats(pool: &SqlitePool, range: &DateRange) -> ApiResult<Vec<SourceStatsRow>> {
    let rows = sqlx::query(
        r#"
        SELECT
            f.source,
            COUNT(f.id) AS feedback_count,
            COUNT(DISTINCT f.customer_id) AS unique_customers,
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END) AS positive_count,
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END) AS neutral_count,
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END) AS negative_count,
            AVG(na.sentiment_score) AS avg_sentiment_score,
            AVG(na.toxicity_score) AS avg_toxicity_score
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE date(f.created_at) BETWEEN ? AND ?
        GROUP BY f.source
        ORDER BY feedback_count DESC
        "#,
    )
    .bind(range.start_str())
    .bind(range.end_str())
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| SourceStatsRow {
            source: row.get("source"),
            feedback_count: row.get("feedback_count"),
            unique_customers: row.get("unique_customers"),
            positive_count: row.get("positive_count"),
            neutral_count: row.get("neutral_count"),
            negative_count: row.get("negative_count"),
            avg_sentiment_score: row.get("avg_sentiment_score"),
            avg_toxicity_score: row.get("avg_toxicity_score"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct ToxicityStats {
    pub total_analyzed: i64,
    pub toxic_count: i64,
    pub non_toxic_count: i64,
    pub avg_toxicity_score: Option<f64>,
    pub min_toxicity_score: Option<f64>,
    pub max_toxicity_score: Option<f64>,
    pub toxicity_stddev: Option<f64>,
}

pub async fn toxicity_stats(
    pool: &SqlitePool,
    range: &DateRange,
    threshold: f64,
) -> ApiResult<ToxicityStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_analyzed,
            COUNT(CASE WHEN na.toxicity_score >= ?1 THEN 1 END) AS toxic_count,
            COUNT(CASE WHEN na.toxicity_score < ?1 THEN 1 END) AS non_toxic_count,
            AVG(na.toxicity_score) AS avg_score,
            MIN(na.toxicity_score) AS min_score,
            MAX(na.toxicity_score) AS max_score,
            AVG(na.toxicity_score * na.toxicity_score) AS avg_square
        FROM feedback f
        JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE na.toxicity_score IS NOT NULL
          AND date(f.created_at) BETWEEN ?2 AND ?3
        "#,
    )
    .bind(threshold)
    .bind(range.start_str())
    .bind(range.end_str())
    .fetch_one(pool)
    .await
    .map_err(Error::from)?;

    let avg: Option<f64> = row.get("avg_score");
    let avg_square: Option<f64> = row.get("avg_square");
    let stddev = match (avg, avg_square) {
        (Some(mean), Some(mean_sq)) => Some((mean_sq - mean * mean).max(0.0).sqrt()),
        _ => None,
    };

    Ok(ToxicityStats {
        total_analyzed: row.get("total_analyzed"),
        toxic_count: row.get("toxic_count"),
        non_toxic_count: row.get("non_toxic_count"),
        avg_toxicity_score: avg,
        min_toxicity_score: row.get("min_score"),
        max_toxicity_score: row.get("max_score"),
        toxicity_stddev: stddev,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTrendRow {
    pub date: String,
    pub total_feedback: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment_score: Option<f64>,
}

async fn daily_trend(pool: &SqlitePool, range: &DateRange) -> ApiResult<Vec<DailyTrendRow>> {
    let rows = sqlx::query(
        r#"
        SELECT
            date(f.created_at) AS day,
            COUNT(*) AS total_feedback,
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END) AS positive_count,
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END) AS neutral_count,
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END) AS negative_count,
            AVG(na.sentiment_score) AS avg_sentiment_score
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE date(f.created_at) BETWEEN ? AND ?
        GROUP BY day
        ORDER BY day DESC
        "#,
    )
    .bind(range.start_str())
    .bind(range.end_str())
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| DailyTrendRow {
            date: row.get("day"),
            total_feedback: row.get("total_feedback"),
            positive_count: row.get("positive_count"),
            neutral_count: row.get("neutral_count"),
            negative_count: row.get("negative_count"),
            avg_sentiment_score: row.get("avg_sentiment_score"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_feedback: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub negative_percentage: f64,
    pub avg_sentiment_score: Option<f64>,
    pub avg_toxicity_score: Option<f64>,
    pub daily_trend: Vec<DailyTrendRow>,
}

pub async fn summary(pool: &SqlitePool, range: &DateRange) -> ApiResult<Summary> {
    let totals = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_feedback,
            COUNT(CASE WHEN na.sentiment = 1 THEN 1 END) AS positive_count,
            COUNT(CASE WHEN na.sentiment = 0 THEN 1 END) AS neutral_count,
            COUNT(CASE WHEN na.sentiment = -1 THEN 1 END) AS negative_count,
            AVG(na.sentiment_score) AS avg_sentiment_score,
            AVG(na.toxicity_score) AS avg_toxicity_score
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        WHERE date(f.created_at) BETWEEN ? AND ?
        "#,
    )
    .bind(range.start_str())
    .bind(range.end_str())
    .fetch_one(pool)
    .await
    .map_err(Error::from)?;

    let total: i64 = totals.get("total_feedback");
    let negative: i64 = totals.get("negative_count");
    let negative_percentage = if total > 0 {
        (negative as f64 / total as f64 * 10000.0).round() / 100.0
    } else {
        0.0
    };

    // The trailing series is capped at 14 days regardless of range width
    let trend_range = range.clamp_trailing_days(14);
    let trend = daily_trend(pool, &trend_range).await?;

    Ok(Summary {
        total_feedback: total,
        positive_count: totals.get("positive_count"),
        neutral_count: totals.get("neutral_count"),
        negative_count: negative,
        negative_percentage,
        avg_sentiment_score: totals.get("avg_sentiment_score"),
        avg_toxicity_score: totals.get("avg_toxicity_score"),
        daily_trend: trend,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicRow {
    pub topic_id: i64,
    pub label: String,
    pub count: i64,
    pub avg_sentiment: Option<f64>,
    /// Count delta against the immediately preceding window of the same
    /// width.
    pub delta_prior_window: i64,
}

pub async fn topics(pool: &SqlitePool, range: &DateRange) -> ApiResult<Vec<TopicRow>> {
    let prior = range.prior_window();

    let rows = sqlx::query(
        r#"
        SELECT
            t.id AS topic_id,
            t.label,
            COUNT(f.id) AS count,
            AVG(na.sentiment_score) AS avg_sentiment
        FROM topic t
        LEFT JOIN nlp_annotation na ON t.id = na.topic_id
        LEFT JOIN feedback f
            ON na.feedback_id = f.id AND date(f.created_at) BETWEEN ?1 AND ?2
        GROUP BY t.id, t.label
        HAVING COUNT(f.id) > 0
        ORDER BY count DESC, avg_sentiment DESC
        "#,
    )
    .bind(range.start_str())
    .bind(range.end_str())
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    let prior_rows = sqlx::query(
        r#"
        SELECT na.topic_id AS topic_id, COUNT(f.id) AS count
        FROM nlp_annotation na
        JOIN feedback f ON na.feedback_id = f.id
        WHERE na.topic_id IS NOT NULL
          AND date(f.created_at) BETWEEN ?1 AND ?2
        GROUP BY na.topic_id
        "#,
    )
    .bind(prior.start_str())
    .bind(prior.end_str())
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    let prior_counts: std::collections::HashMap<i64, i64> = prior_rows
        .iter()
        .map(|row| (row.get("topic_id"), row.get("count")))
        .collect();

    Ok(rows
        .iter()
        .map(|row| {
            let topic_id: i64 = row.get("topic_id");
            let count: i64 = row.get("count");
            TopicRow {
                topic_id,
                label: row.get("label"),
                count,
                avg_sentiment: row.get("avg_sentiment"),
                delta_prior_window: count - prior_counts.get(&topic_id).copied().unwrap_or(0),
            }
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct ExampleRow {
    pub id: String,
    pub text: String,
    pub created_at: String,
    pub sentiment: Option<i64>,
    pub sentiment_score: Option<f64>,
    pub toxicity_score: Option<f64>,
    pub topic_id: Option<i64>,
    pub topic_label: Option<String>,
}

pub async fn examples(
    pool: &SqlitePool,
    topic_id: Option<i64>,
    sentiment: Option<i64>,
    limit: i64,
) -> ApiResult<Vec<ExampleRow>> {
    if let Some(s) = sentiment {
        if ![-1, 0, 1].contains(&s) {
            return Err(crate::error::ApiError::validation(
                "Sentiment must be -1, 0, or 1",
            ));
        }
    }
    let limit = limit.clamp(1, 50);

    let rows = sqlx::query(
        r#"
        SELECT
            f.id, f.text, f.created_at,
            na.sentiment, na.sentiment_score, na.toxicity_score,
            t.id AS topic_id, t.label AS topic_label
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        LEFT JOIN topic t ON na.topic_id = t.id
        WHERE (?1 IS NULL OR na.topic_id = ?1)
          AND (?2 IS NULL OR na.sentiment = ?2)
        ORDER BY f.created_at DESC
        LIMIT ?3
        "#,
    )
    .bind(topic_id)
    .bind(sentiment)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    Ok(rows
        .iter()
        .map(|row| ExampleRow {
            id: row.get("id"),
            text: row.get("text"),
            created_at: row.get("created_at"),
            sentiment: row.get("sentiment"),
            sentiment_score: row.get("sentiment_score"),
            toxicity_score: row.get("toxicity_score"),
            topic_id: row.get("topic_id"),
            topic_label: row.get("topic_label"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_feedback: i64,
    pub negative_percentage: f64,
    pub topic_count: i64,
    pub daily_trend: Vec<DailyTrendRow>,
    pub top_negative_topics: Vec<TopicRow>,
}

pub async fn dashboard_summary(pool: &SqlitePool, range: &DateRange) -> ApiResult<DashboardSummary> {
    let base = summary(pool, range).await?;
    let topic_count = pulse_common::db::topics::count(pool)
        .await
        .map_err(crate::error::ApiError::from)?;

    let mut all_topics = topics(pool, range).await?;
    all_topics.sort_by(|a, b| {
        a.avg_sentiment
            .unwrap_or(0.0)
            .partial_cmp(&b.avg_sentiment.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top_negative_topics = all_topics.into_iter().take(5).collect();

    Ok(DashboardSummary {
        total_feedback: base.total_feedback,
        negative_percentage: base.negative_percentage,
        topic_count,
        daily_trend: base.daily_trend,
        top_negative_topics,
    })
}
