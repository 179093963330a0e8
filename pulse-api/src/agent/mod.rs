//! Grounded QA facade
//!
//! Routes a free-text question through the typed tool set under a bounded
//! loop: the model either calls a tool (the output is fed back) or
//! produces a final answer, which must pass grounding validation. One
//! regeneration attempt is granted on violation; after that the answer
//! ships with a warning attached.

pub mod grounding;
pub mod llm;
pub mod tools;

use crate::error::ApiResult;
use llm::{LlmClient, LlmMessage, LlmReply};
use pulse_common::db::annotations;
use pulse_common::vector::VectorStore;
use pulse_common::Error;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tools::{ToolInvocation, ToolRequest};
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on model round-trips per question.
const MAX_ITERATIONS: usize = 5;

const SYSTEM_PROMPT: &str = "\
You are an assistant answering questions about customer feedback data. \
Ground every answer in tool output. When quoting a feedback comment, ALWAYS \
cite its feedback_id, e.g. (feedback_id: 123e4567-e89b-12d3-a456-426614174000). \
Never state numbers that did not come from a tool result. Use analytics_sql \
for aggregates and trends, vector_examples for representative comments, and \
report_writer for weekly summaries.";

/// One citation in a QA response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub feedback_id: Uuid,
    pub topic_id: Option<i64>,
}

/// Outcome of one QA request.
#[derive(Debug, Clone, Serialize)]
pub struct QaOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Filter bundle appended verbatim to the question.
#[derive(Debug, Clone, Default, serde::Deserialize, Serialize)]
pub struct QueryFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sentiment: Option<i64>,
    pub topic_ids: Option<Vec<i64>>,
    pub source: Option<String>,
    pub customer_id: Option<String>,
    pub language: Option<String>,
}

impl QueryFilters {
    /// Render the filters as the descriptive prompt suffix the agent is
    /// not permitted to ignore.
    pub fn describe(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(start) = &self.start_date {
            parts.push(format!("from {start}"));
        }
        if let Some(end) = &self.end_date {
            parts.push(format!("until {end}"));
        }
        if let Some(sentiment) = self.sentiment {
            let label = match sentiment {
                -1 => "negative",
                1 => "positive",
                _ => "neutral",
            };
            parts.push(format!("with {label} sentiment"));
        }
        if let Some(topics) = &self.topic_ids {
            if !topics.is_empty() {
                parts.push(format!("related to topics {topics:?}"));
            }
        }
        if let Some(source) = &self.source {
            parts.push(format!("from source '{source}'"));
        }
        if let Some(customer) = &self.customer_id {
            parts.push(format!("from customer '{customer}'"));
        }
        if let Some(language) = &self.language {
            parts.push(format!("in language '{language}'"));
        }

        if parts.is_empty() {
            None
        } else {
            Some(format!(
                "(filtered to show only feedback {})",
                parts.join(" and ")
            ))
        }
    }
}

/// The agent: per-request state is confined to the loop locals, so many
/// requests run in parallel against one shared instance.
pub struct QaAgent {
    llm: Arc<dyn LlmClient>,
    pool: SqlitePool,
    vector: Arc<dyn VectorStore>,
}

impl QaAgent {
    pub fn new(llm: Arc<dyn LlmClient>, pool: SqlitePool, vector: Arc<dyn VectorStore>) -> Self {
        Self { llm, pool, vector }
    }

    pub async fn answer(&self, question: &str, filters: &QueryFilters) -> ApiResult<QaOutcome> {
        let prompt = match filters.describe() {
            Some(suffix) => format!("{question} {suffix}"),
            None => question.to_string(),
        };

        let mut messages = vec![LlmMessage::user(&prompt)];
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut regenerated = false;
        let mut warnings = Vec::new();

        for iteration in 0..MAX_ITERATIONS {
            let reply = self.llm.complete(SYSTEM_PROMPT, &messages).await?;

            match reply {
                LlmReply::ToolCall { tool, arguments } => {
                    let invocation = match ToolRequest::parse(&tool, &arguments) {
                        Ok(request) => tools::execute(&self.pool, self.vector.as_ref(), &request).await,
                        Err(e) => ToolInvocation {
                            tool: "invalid",
                            output: serde_json::json!({ "error": e.to_string() }).to_string(),
                        },
                    };

                    info!(iteration, tool = invocation.tool, "Agent tool call");
                    messages.push(LlmMessage::assistant(format!("[called tool {tool}]")));
                    messages.push(LlmMessage::tool(invocation.output.clone()));
                    invocations.push(invocation);
                }
                LlmReply::Final { answer } => {
                    let outputs: Vec<String> =
                        invocations.iter().map(|i| i.output.clone()).collect();
                    let violations = grounding::validate(&answer, question, &outputs);

                    if !violations.is_clean() && !regenerated {
                        // One shot at self-correction
                        warn!(issues = %violations.describe(), "Answer failed grounding, regenerating");
                        regenerated = true;
                        messages.push(LlmMessage::assistant(&answer));
                        messages.push(LlmMessage::user(format!(
                            "Your answer was rejected: {}. Revise it, citing feedback_ids \
                             for every quote and only using numbers from tool output.",
                            violations.describe()
                        )));
                        continue;
                    }

                    if !violations.is_clean() {
                        warnings.push(format!("Answer may not be fully grounded: {}", violations.describe()));
                    }

                    let citations = self.resolve_citations(&answer).await?;
                    return Ok(QaOutcome {
                        answer,
                        citations,
                        warnings,
                    });
                }
            }
        }

        Err(crate::error::ApiError(Error::Timeout(format!(
            "Agent exhausted its {MAX_ITERATIONS}-iteration budget without a final answer"
        ))))
    }

    /// Resolve cited feedback ids to citations with their topic, dropping
    /// ids that do not exist.
    async fn resolve_citations(&self, answer: &str) -> ApiResult<Vec<Citation>> {
        let mut citations = Vec::new();
        for id in grounding::extract_citation_ids(answer) {
            match annotations::load_for_feedback(&self.pool, id).await {
                Ok(Some(annotation)) => citations.push(Citation {
                    feedback_id: id,
                    topic_id: annotation.topic_id,
                }),
                Ok(None) => {
                    // Cited but never annotated; keep the citation without
                    // a topic if the feedback row exists at all.
                    if pulse_common::db::feedback::load_by_id(&self.pool, id).await?.is_some() {
                        citations.push(Citation {
                            feedback_id: id,
                            topic_id: None,
                        });
                    }
                }
                Err(e) => return Err(crate::error::ApiError(e)),
            }
        }
        Ok(citations)
    }
}
