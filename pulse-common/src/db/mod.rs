//! Persistence adapter
//!
//! Pool management, schema initialisation, and parameterised operations
//! grouped per entity. Callers never build SQL from request input; every
//! statement here binds parameters.

pub mod aggregates;
pub mod annotations;
pub mod batches;
pub mod feedback;
pub mod retry;
pub mod topics;

use crate::config::DatabaseSettings;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

pub use retry::with_retry;

/// Open the connection pool sized `pool_size + max_overflow`.
pub async fn connect_pool(settings: &DatabaseSettings) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&settings.url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.pool_size + settings.max_overflow)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Single-connection in-memory pool for tests.
pub async fn connect_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes. Idempotent; safe to run at every start.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            customer_id TEXT,
            text TEXT NOT NULL,
            normalized_text TEXT,
            detected_language TEXT,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feedback_created_at ON feedback(created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_feedback_source ON feedback(source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feedback_customer ON feedback(customer_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topic (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            keywords TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nlp_annotation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feedback_id TEXT NOT NULL UNIQUE REFERENCES feedback(id) ON DELETE CASCADE,
            sentiment INTEGER,
            sentiment_score REAL,
            topic_id INTEGER REFERENCES topic(id),
            toxicity_score REAL,
            embedding TEXT,
            model_version TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_annotation_topic ON nlp_annotation(topic_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topic_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_id INTEGER,
            action TEXT NOT NULL,
            old_label TEXT,
            new_label TEXT,
            old_keywords TEXT,
            new_keywords TEXT,
            changed_by TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            changed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            received_at TEXT NOT NULL,
            processed_count INTEGER NOT NULL DEFAULT 0,
            created_count INTEGER NOT NULL DEFAULT 0,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            skipped_non_english_count INTEGER NOT NULL DEFAULT 0,
            job_id TEXT,
            status TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            enqueued_at TEXT NOT NULL,
            visible_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_claim ON job(queue, status, visible_at, enqueued_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_feedback_aggregates (
            date TEXT PRIMARY KEY,
            total_feedback INTEGER NOT NULL DEFAULT 0,
            positive_count INTEGER NOT NULL DEFAULT 0,
            neutral_count INTEGER NOT NULL DEFAULT 0,
            negative_count INTEGER NOT NULL DEFAULT 0,
            avg_sentiment_score REAL,
            avg_toxicity_score REAL,
            unique_customers INTEGER NOT NULL DEFAULT 0,
            unique_topics INTEGER NOT NULL DEFAULT 0,
            top_sources TEXT NOT NULL DEFAULT '',
            refreshed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
