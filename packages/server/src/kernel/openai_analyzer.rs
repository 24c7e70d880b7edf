//! OpenAI chat-completions analysis collaborator.
//!
//! Each task's prompt is sent as the system message and the model is asked
//! for a JSON object. The step executors validate the object's shape.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scan_engine::{AnalysisError, AnalysisTask, Analyzer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Characters of page content sent per request.
const MAX_CONTENT_CHARS: usize = 24_000;

#[derive(Clone)]
pub struct OpenAiAnalyzer {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AnalysisError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AnalysisError::Http(Box::new(e)))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        })
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    #[instrument(skip(self, task, content), fields(task = task.as_str(), model = %self.model))]
    async fn analyze(
        &self,
        task: AnalysisTask,
        content: &str,
    ) -> Result<serde_json::Value, AnalysisError> {
        let content = truncate(content, MAX_CONTENT_CHARS);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: task.prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: &content,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Http(Box::new(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "OpenAI API error");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => AnalysisError::RateLimited,
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AnalysisError::Timeout,
                _ => AnalysisError::Http(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("OpenAI API error: {} - {}", status, body),
                ))),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AnalysisError::MalformedResponse("no completion content".into()))?;

        debug!(chars = text.len(), "analysis response received");
        parse_judgment(&text)
    }
}

/// The completion must be a single JSON object.
fn parse_judgment(text: &str) -> Result<serde_json::Value, AnalysisError> {
    let value: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
    if !value.is_object() {
        return Err(AnalysisError::MalformedResponse(
            "expected a JSON object".into(),
        ));
    }
    Ok(value)
}

fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgment_must_be_an_object() {
        let value = parse_judgment(r#" {"topics": []} "#).unwrap();
        assert!(value["topics"].is_array());

        assert!(matches!(
            parse_judgment("[1, 2]"),
            Err(AnalysisError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_judgment("Sure! Here are the topics"),
            Err(AnalysisError::MalformedResponse(_))
        ));
    }

    #[test]
    fn request_uses_json_mode() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "system",
                content: AnalysisTask::Topics.prompt(),
            }],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn truncate_keeps_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
