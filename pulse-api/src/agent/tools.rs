//! The QA facade's tool set
//!
//! Three typed tools: whitelisted analytics operations, vector-backed
//! example retrieval, and a weekly report renderer. Tool inputs decode
//! from the model's JSON arguments; outputs are JSON strings fed back to
//! the model and retained for grounding validation.

use crate::analytics::{queries, DateRange, GroupBy};
use pulse_common::db::feedback;
use pulse_common::error::{Error, Result};
use pulse_common::vector::VectorStore;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

/// Whitelisted analytics operations the SQL tool accepts.
const ALLOWED_OPERATIONS: &[&str] = &[
    "sentiment_trends",
    "volume_trends",
    "customer_stats",
    "source_stats",
    "toxicity_stats",
    "summary",
    "topics",
];

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsSqlInput {
    pub operation: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub group_by: Option<String>,
    pub min_feedback_count: Option<i64>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorExamplesInput {
    pub topic_id: Option<i64>,
    pub sentiment: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportWriterInput {
    pub week_start_date: String,
    pub total_feedback: i64,
    pub negative_percentage: f64,
    #[serde(default)]
    pub top_topics: Vec<String>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    pub avg_sentiment_score: Option<f64>,
    pub most_negative_topic: Option<String>,
}

/// The finite tool variant set.
#[derive(Debug, Clone)]
pub enum ToolRequest {
    AnalyticsSql(AnalyticsSqlInput),
    VectorExamples(VectorExamplesInput),
    ReportWriter(ReportWriterInput),
}

impl ToolRequest {
    /// Decode a model tool call into a typed request.
    pub fn parse(tool: &str, arguments: &Value) -> Result<Self> {
        let decode_err =
            |e: serde_json::Error| Error::Validation(format!("Bad arguments for '{tool}': {e}"));
        match tool {
            "analytics_sql" => Ok(ToolRequest::AnalyticsSql(
                serde_json::from_value(arguments.clone()).map_err(decode_err)?,
            )),
            "vector_examples" => Ok(ToolRequest::VectorExamples(
                serde_json::from_value(arguments.clone()).map_err(decode_err)?,
            )),
            "report_writer" => Ok(ToolRequest::ReportWriter(
                serde_json::from_value(arguments.clone()).map_err(decode_err)?,
            )),
            other => Err(Error::Validation(format!("Unknown tool '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::AnalyticsSql(_) => "analytics_sql",
            ToolRequest::VectorExamples(_) => "vector_examples",
            ToolRequest::ReportWriter(_) => "report_writer",
        }
    }
}

/// One executed tool invocation, kept for the audit log and grounding
/// checks.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: &'static str,
    pub output: String,
}

async fn run_analytics_sql(pool: &SqlitePool, input: &AnalyticsSqlInput) -> Result<String> {
    if !ALLOWED_OPERATIONS.contains(&input.operation.as_str()) {
        return Err(Error::Validation(format!(
            "Operation '{}' is not whitelisted. Allowed: {}",
            input.operation,
            ALLOWED_OPERATIONS.join(", ")
        )));
    }

    let range = DateRange::resolve(input.start_date.as_deref(), input.end_date.as_deref())
        .map_err(|e| e.0)?;

    let value = match input.operation.as_str() {
        "sentiment_trends" => {
            let group_by = GroupBy::parse(input.group_by.as_deref()).map_err(|e| e.0)?;
            serde_json::to_value(
                queries::sentiment_trends(pool, &range, group_by)
                    .await
                    .map_err(|e| e.0)?,
            )
        }
        "volume_trends" => {
            let group_by = GroupBy::parse(input.group_by.as_deref()).map_err(|e| e.0)?;
            serde_json::to_value(
                queries::volume_trends(pool, &range, group_by)
                    .await
                    .map_err(|e| e.0)?,
            )
        }
        "customer_stats" => serde_json::to_value(
            queries::customer_stats(pool, &range, input.min_feedback_count.unwrap_or(1))
                .await
                .map_err(|e| e.0)?,
        ),
        "source_stats" => {
            serde_json::to_value(queries::source_stats(pool, &range).await.map_err(|e| e.0)?)
        }
        "toxicity_stats" => serde_json::to_value(
            queries::toxicity_stats(pool, &range, input.threshold.unwrap_or(0.5))
                .await
                .map_err(|e| e.0)?,
        ),
        "summary" => serde_json::to_value(queries::summary(pool, &range).await.map_err(|e| e.0)?),
        "topics" => serde_json::to_value(queries::topics(pool, &range).await.map_err(|e| e.0)?),
        _ => unreachable!("operation checked against whitelist"),
    };

    value.map(|v| v.to_string())
        .map_err(|e| Error::Internal(format!("Tool output serialisation failed: {e}")))
}

async fn run_vector_examples(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    input: &VectorExamplesInput,
) -> Result<String> {
    if let Some(s) = input.sentiment {
        if ![-1, 0, 1].contains(&s) {
            return Err(Error::Validation("Sentiment must be -1, 0, or 1".into()));
        }
    }
    let limit = input.limit.unwrap_or(5).min(10);

    let ids = store.query(input.topic_id, input.sentiment, limit).await?;
    let mut examples = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = feedback::load_by_id(pool, id).await? {
            let mut snippet = row.text.clone();
            if snippet.len() > 200 {
                snippet.truncate(200);
                snippet.push_str("...");
            }
            examples.push(json!({
                "feedback_id": row.id.to_string(),
                "text": snippet,
                "source": row.source,
                "created_at": row.created_at.to_rfc3339(),
            }));
        }
    }

    if examples.is_empty() {
        return Ok(json!({
            "examples": [],
            "note": "No feedback examples matched the filters",
        })
        .to_string());
    }
    Ok(json!({ "examples": examples }).to_string())
}

fn run_report_writer(input: &ReportWriterInput) -> Result<String> {
    if chrono::NaiveDate::parse_from_str(&input.week_start_date, "%Y-%m-%d").is_err() {
        return Err(Error::Validation(
            "week_start_date must be in YYYY-MM-DD format".into(),
        ));
    }

    let mut lines = vec![
        format!("# Weekly feedback summary — week of {}", input.week_start_date),
        String::new(),
        format!("- Total feedback: {}", input.total_feedback),
        format!("- Negative share: {:.1}%", input.negative_percentage),
    ];
    if let Some(avg) = input.avg_sentiment_score {
        lines.push(format!("- Average sentiment score: {avg:.3}"));
    }
    if let Some(topic) = &input.most_negative_topic {
        lines.push(format!("- Most negative topic: {topic}"));
    }
    if !input.top_topics.is_empty() {
        lines.push(String::new());
        lines.push("## Top topics".to_string());
        for topic in &input.top_topics {
            lines.push(format!("- {topic}"));
        }
    }
    if !input.key_insights.is_empty() {
        lines.push(String::new());
        lines.push("## Key insights".to_string());
        for insight in &input.key_insights {
            lines.push(format!("- {insight}"));
        }
    }

    Ok(json!({ "report": lines.join("\n") }).to_string())
}

/// Execute one tool request. Errors are rendered back to the model as
/// tool output rather than failing the request; only infrastructure
/// failures propagate.
pub async fn execute(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    request: &ToolRequest,
) -> ToolInvocation {
    let result = match request {
        ToolRequest::AnalyticsSql(input) => run_analytics_sql(pool, input).await,
        ToolRequest::VectorExamples(input) => run_vector_examples(pool, store, input).await,
        ToolRequest::ReportWriter(input) => run_report_writer(input),
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => json!({ "error": e.to_string() }).to_string(),
    };

    tracing::info!(tool = request.name(), "Tool invocation");
    ToolInvocation {
        tool: request.name(),
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::db::connect_memory;
    use pulse_common::vector::SqlVectorStore;

    #[test]
    fn test_parse_rejects_unknown_tool() {
        assert!(ToolRequest::parse("drop_tables", &json!({})).is_err());
    }

    #[test]
    fn test_parse_analytics_sql() {
        let request = ToolRequest::parse(
            "analytics_sql",
            &json!({ "operation": "summary", "start_date": "2024-01-01" }),
        )
        .unwrap();
        assert_eq!(request.name(), "analytics_sql");
    }

    #[tokio::test]
    async fn test_whitelist_enforced() {
        let pool = connect_memory().await.unwrap();
        let input = AnalyticsSqlInput {
            operation: "delete_everything".into(),
            start_date: None,
            end_date: None,
            group_by: None,
            min_feedback_count: None,
            threshold: None,
        };
        assert!(run_analytics_sql(&pool, &input).await.is_err());
    }

    #[tokio::test]
    async fn test_whitelisted_operation_runs() {
        let pool = connect_memory().await.unwrap();
        let input = AnalyticsSqlInput {
            operation: "summary".into(),
            start_date: None,
            end_date: None,
            group_by: None,
            min_feedback_count: None,
            threshold: None,
        };
        let output = run_analytics_sql(&pool, &input).await.unwrap();
        assert!(output.contains("total_feedback"));
    }

    #[tokio::test]
    async fn test_vector_examples_empty_store() {
        let pool = connect_memory().await.unwrap();
        let store = SqlVectorStore::new(pool.clone());
        let input = VectorExamplesInput {
            topic_id: None,
            sentiment: Some(-1),
            limit: Some(5),
        };
        let output = run_vector_examples(&pool, &store, &input).await.unwrap();
        assert!(output.contains("No feedback examples"));
    }

    #[test]
    fn test_report_writer_renders() {
        let input = ReportWriterInput {
            week_start_date: "2024-03-04".into(),
            total_feedback: 120,
            negative_percentage: 22.5,
            top_topics: vec!["checkout".into()],
            key_insights: vec!["Checkout complaints doubled".into()],
            avg_sentiment_score: Some(-0.1),
            most_negative_topic: Some("checkout".into()),
        };
        let output = run_report_writer(&input).unwrap();
        assert!(output.contains("Weekly feedback summary"));
        assert!(output.contains("checkout"));
    }

    #[test]
    fn test_report_writer_rejects_bad_date() {
        let input = ReportWriterInput {
            week_start_date: "04/03/2024".into(),
            total_feedback: 1,
            negative_percentage: 0.0,
            top_topics: vec![],
            key_insights: vec![],
            avg_sentiment_score: None,
            most_negative_topic: None,
        };
        assert!(run_report_writer(&input).is_err());
    }
}
