//! Language model client for the QA facade
//!
//! The agent loop only sees this trait: one completion in, either a tool
//! call or a final answer out. The HTTP implementation talks to an
//! OpenAI-style chat endpoint; tests substitute a scripted client.

use async_trait::async_trait;
use pulse_common::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of the conversation fed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
        }
    }
}

/// What the model decided to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    ToolCall { tool: String, arguments: Value },
    Final { answer: String },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, messages: &[LlmMessage]) -> Result<LlmReply>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    name: String,
    arguments: String,
}

/// Client for an OpenAI-style chat completions endpoint.
pub struct HttpLlmClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }

    fn tool_definitions() -> Value {
        serde_json::json!([
            {
                "type": "function",
                "function": {
                    "name": "analytics_sql",
                    "description": "Run one whitelisted read-only analytics operation. Operations: sentiment_trends, volume_trends, customer_stats, source_stats, toxicity_stats, summary, topics.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "operation": { "type": "string" },
                            "start_date": { "type": "string" },
                            "end_date": { "type": "string" },
                            "group_by": { "type": "string" },
                            "min_feedback_count": { "type": "integer" },
                            "threshold": { "type": "number" }
                        },
                        "required": ["operation"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "vector_examples",
                    "description": "Retrieve exemplar feedback filtered by topic and/or sentiment. Always cite feedback_ids when quoting these examples.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "topic_id": { "type": "integer" },
                            "sentiment": { "type": "integer" },
                            "limit": { "type": "integer" }
                        }
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "report_writer",
                    "description": "Render a structured weekly summary report from supplied metrics.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "week_start_date": { "type": "string" },
                            "total_feedback": { "type": "integer" },
                            "negative_percentage": { "type": "number" },
                            "top_topics": { "type": "array", "items": { "type": "string" } },
                            "key_insights": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["week_start_date", "total_feedback", "negative_percentage"]
                    }
                }
            }
        ])
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system: &str, messages: &[LlmMessage]) -> Result<LlmReply> {
        let mut payload_messages = vec![serde_json::json!({
            "role": "system",
            "content": system,
        })];
        for message in messages {
            payload_messages.push(serde_json::to_value(message).unwrap_or_default());
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "messages": payload_messages,
                "tools": Self::tool_definitions(),
                "temperature": 0.1,
            }))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("LLM endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "LLM endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("Bad LLM payload: {e}")))?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(Error::Unavailable("LLM returned no choices".into()));
        };

        if let Some(calls) = choice.message.tool_calls {
            if let Some(call) = calls.into_iter().next() {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::Null);
                return Ok(LlmReply::ToolCall {
                    tool: call.function.name,
                    arguments,
                });
            }
        }

        Ok(LlmReply::Final {
            answer: choice.message.content.unwrap_or_default(),
        })
    }
}
