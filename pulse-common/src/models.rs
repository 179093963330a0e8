//! Core entity types shared by the API server and the workers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One customer utterance.
///
/// Immutable after creation apart from the normalisation fields filled in
/// by the ingest stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub source: String,
    pub customer_id: Option<String>,
    pub text: String,
    pub normalized_text: Option<String>,
    pub detected_language: Option<String>,
    pub meta: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(source: String, text: String, customer_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            customer_id,
            text,
            normalized_text: None,
            detected_language: None,
            meta: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_meta(mut self, meta: BTreeMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }
}

/// Sentiment class: -1 negative, 0 neutral, +1 positive.
pub type SentimentClass = i64;

/// The enrichment record attached to one feedback.
///
/// At most one live annotation exists per feedback; writes are UPSERTs
/// keyed on `feedback_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub feedback_id: Uuid,
    pub sentiment: Option<SentimentClass>,
    pub sentiment_score: Option<f64>,
    pub topic_id: Option<i64>,
    pub toxicity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named cluster of semantically related feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub label: String,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Label of the sentinel topic that absorbs annotations when their topic
/// is deleted.
pub const UNASSIGNED_TOPIC_LABEL: &str = "unassigned";

/// Action tags recorded in the topic audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Relabel,
    ReassignFeedback,
    Create,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Relabel => "relabel",
            AuditAction::ReassignFeedback => "reassign_feedback",
            AuditAction::Create => "create",
            AuditAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relabel" => Some(AuditAction::Relabel),
            "reassign_feedback" => Some(AuditAction::ReassignFeedback),
            "create" => Some(AuditAction::Create),
            "delete" => Some(AuditAction::Delete),
            _ => None,
        }
    }
}

/// Immutable record of an admin mutation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub topic_id: Option<i64>,
    pub action: AuditAction,
    pub old_label: Option<String>,
    pub new_label: Option<String>,
    pub old_keywords: Option<Vec<String>>,
    pub new_keywords: Option<Vec<String>>,
    pub changed_by: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Lifecycle of a batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Received,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Received => "received",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(BatchStatus::Received),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

/// An ingest file or bulk submission, with per-row outcome counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub source: String,
    pub received_at: DateTime<Utc>,
    pub processed_count: i64,
    pub created_count: i64,
    pub duplicate_count: i64,
    pub error_count: i64,
    pub skipped_non_english_count: i64,
    pub job_id: Option<Uuid>,
    pub status: BatchStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(source: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            received_at: Utc::now(),
            processed_count: 0,
            created_count: 0,
            duplicate_count: 0,
            error_count: 0,
            skipped_non_english_count: 0,
            job_id: None,
            status: BatchStatus::Received,
            completed_at: None,
        }
    }
}

/// Outcome of one row in a batch submission, reported in input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Created { id: Uuid },
    Duplicate { of: Uuid },
    Error { reason: String },
    SkippedNonEnglish,
}
