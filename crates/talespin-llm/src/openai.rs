//! Client for OpenAI-compatible chat-completions APIs (Ollama, vLLM, hosted
//! services).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_MODEL, LlmConfig};
use crate::ports::{LlmError, LlmPort, LlmRequest, LlmResponse, MessageRole};

/// HTTP backend for the `OpenAiCompatible` backend kind.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiCompatibleClient {
    /// Creates a client with the given request timeout.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            default_model: DEFAULT_MODEL.to_owned(),
        }
    }

    /// Creates a client from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn map_send_error(error: &reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(error.to_string())
        } else {
            LlmError::RequestFailed(error.to_string())
        }
    }
}

#[async_trait]
impl LlmPort for OpenAiCompatibleClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let api_request = ChatRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: build_messages(&request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_owned(),
            }),
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&api_request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Self::map_send_error(&e))?;
            return Err(LlmError::RequestFailed(format!("{status}: {body}")));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        convert_response(api_response)
    }
}

fn build_messages(request: &LlmRequest) -> Vec<ApiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system_prompt {
        messages.push(ApiMessage {
            role: "system".to_owned(),
            content: Some(system.clone()),
        });
    }

    for msg in &request.messages {
        messages.push(ApiMessage {
            role: match msg.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            }
            .to_owned(),
            content: Some(msg.content.clone()),
        });
    }

    messages
}

fn convert_response(response: ChatResponse) -> Result<LlmResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in LLM response".to_owned()))?;

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        total_tokens: response.usage.map(|u| u.total_tokens),
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ChatMessage;

    #[test]
    fn test_build_messages_puts_system_prompt_first() {
        let request = LlmRequest::new(vec![ChatMessage::user("look around")])
            .with_system_prompt("You are the narrator.");

        let messages = build_messages(&request);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content.as_deref(), Some("look around"));
    }

    #[test]
    fn test_json_mode_sets_response_format() {
        let body = ChatRequest {
            model: "m".to_owned(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: Some(10),
            response_format: Some(ResponseFormat {
                r#type: "json_object".to_owned(),
            }),
        };

        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_convert_response_rejects_empty_choices() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();

        let result = convert_response(response);

        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_convert_response_reads_content_and_usage() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"ok\":true}"}}],
                "usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#,
        )
        .unwrap();

        let converted = convert_response(response).unwrap();

        assert_eq!(converted.content, r#"{"ok":true}"#);
        assert_eq!(converted.total_tokens, Some(7));
    }
}
