//! Shared worker context
//!
//! Adapters are constructed once at startup and shared by every consumer
//! task via this handle.

use crate::services::sentiment::SentimentAnalyzer;
use pulse_common::cache::Cache;
use pulse_common::config::Settings;
use pulse_common::metrics::Metrics;
use pulse_common::queue::JobQueue;
use pulse_common::vector::{SqlVectorStore, VectorStore};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerContext {
    pub pool: SqlitePool,
    pub queue: JobQueue,
    pub cache: Cache,
    pub vector: Arc<dyn VectorStore>,
    pub sentiment: Arc<SentimentAnalyzer>,
    pub metrics: Metrics,
    pub english_only: bool,
}

impl WorkerContext {
    pub fn new(pool: SqlitePool, cache: Cache, settings: &Settings) -> Self {
        let sentiment = SentimentAnalyzer::from_flags(
            settings.features.remote_sentiment,
            &settings.external.sentiment_model_url,
        );
        Self {
            queue: JobQueue::new(pool.clone()),
            vector: Arc::new(SqlVectorStore::new(pool.clone())),
            sentiment: Arc::new(sentiment),
            cache,
            metrics: Metrics::new(),
            english_only: settings.features.english_only,
            pool,
        }
    }
}
