//! The structured-call protocol.
//!
//! One call walks a small state machine:
//!
//! ```text
//! Attempt1 --parsed--------------------------------> done (Primary)
//! Attempt1 --unparseable--> Repair --parsed--------> done (Repaired)
//! Attempt1 --backend error--------------+
//! Repair   --unparseable----------------+-> Attempt2 --parsed--> done (Retried)
//!                                           Attempt2 --failed--> Fallback
//! ```
//!
//! A backend error (network, timeout, disabled role) counts as a parse
//! failure: there is one retry in total. `Fallback` returns the contract's
//! deterministic value and records exactly one warning.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use talespin_core::warnings::{WarningCode, Warnings};

use crate::config::{BackendKind, LlmConfig, LlmRole};
use crate::ports::{ChatMessage, LlmError, LlmPort, LlmRequest};
use crate::repair::repair_json;

/// The structured shape a stage expects back, and what to use when the
/// backend cannot produce it.
pub trait ResponseContract: Send + Sync {
    /// Parsed output.
    type Output: DeserializeOwned + Send;

    /// Stage name used for warnings and logs.
    fn name(&self) -> &'static str;

    /// Human-readable description of the expected JSON shape, sent to the
    /// model with every attempt.
    fn schema_hint(&self) -> &'static str;

    /// Semantic checks beyond deserialization. An `Err` is treated exactly
    /// like a parse failure.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    fn validate(&self, output: Self::Output) -> Result<Self::Output, String> {
        Ok(output)
    }

    /// The deterministic value used when both attempts fail.
    fn fallback(&self) -> Self::Output;
}

/// A prompt: system instructions plus the user-turn content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System instructions.
    pub system: String,
    /// User content.
    pub user: String,
}

impl Prompt {
    /// Creates a prompt.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// How a completion was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    /// First response parsed as-is.
    Primary,
    /// First response parsed after repair.
    Repaired,
    /// The correction retry parsed.
    Retried,
    /// Both attempts failed; this is the contract's fallback.
    Fallback,
}

/// Result of a structured call. Always carries a usable value.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<T> {
    /// Parsed or fallback value.
    pub value: T,
    /// How the value was obtained.
    pub source: CompletionSource,
    /// Backend requests issued (0 when the role is disabled).
    pub attempts: u8,
}

impl<T> Completion<T> {
    /// Whether the value is the contract's fallback.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == CompletionSource::Fallback
    }
}

#[derive(Debug)]
enum CallState {
    Attempt1,
    Repair { raw: String, error: String },
    Attempt2 { previous: Option<String>, error: String },
    Fallback { reason: String },
}

/// The wrapper every LLM-dependent stage calls through.
#[derive(Clone)]
pub struct StructuredLlm {
    backend: Arc<dyn LlmPort>,
    config: Arc<LlmConfig>,
}

impl StructuredLlm {
    /// Wraps `backend` with the role table in `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmPort>, config: Arc<LlmConfig>) -> Self {
        Self { backend, config }
    }

    /// The role table.
    #[must_use]
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Runs the structured-call protocol for one stage. Never fails: when
    /// both attempts fail the contract's fallback is returned and one
    /// [`WarningCode::LlmFallback`] warning is appended to `warnings`.
    pub async fn complete<C: ResponseContract>(
        &self,
        prompt: &Prompt,
        contract: &C,
        role: LlmRole,
        warnings: &mut Warnings,
    ) -> Completion<C::Output> {
        let mut attempts = 0_u8;
        let mut state = CallState::Attempt1;

        loop {
            state = match state {
                CallState::Attempt1 => {
                    attempts += 1;
                    match self.send(role, self.first_request(prompt, contract)).await {
                        Ok(raw) => match parse(contract, &raw) {
                            Ok(value) => {
                                return Completion {
                                    value,
                                    source: CompletionSource::Primary,
                                    attempts,
                                };
                            }
                            Err(error) => CallState::Repair { raw, error },
                        },
                        Err(LlmError::Unavailable(reason)) => {
                            attempts = 0;
                            CallState::Fallback { reason }
                        }
                        Err(error) => CallState::Attempt2 {
                            previous: None,
                            error: error.to_string(),
                        },
                    }
                }
                CallState::Repair { raw, error } => {
                    match repair_json(&raw).map(|fixed| parse(contract, &fixed)) {
                        Some(Ok(value)) => {
                            tracing::debug!(stage = contract.name(), "repaired LLM output");
                            return Completion {
                                value,
                                source: CompletionSource::Repaired,
                                attempts,
                            };
                        }
                        Some(Err(repair_error)) => CallState::Attempt2 {
                            previous: Some(raw),
                            error: repair_error,
                        },
                        None => CallState::Attempt2 {
                            previous: Some(raw),
                            error,
                        },
                    }
                }
                CallState::Attempt2 { previous, error } => {
                    attempts += 1;
                    tracing::warn!(
                        stage = contract.name(),
                        role = %role,
                        error = %error,
                        "LLM output unusable, retrying with correction"
                    );
                    let request = self.correction_request(prompt, contract, previous, &error);
                    match self.send(role, request).await {
                        Ok(raw) => match parse_with_repair(contract, &raw) {
                            Ok(value) => {
                                return Completion {
                                    value,
                                    source: CompletionSource::Retried,
                                    attempts,
                                };
                            }
                            Err(reason) => CallState::Fallback { reason },
                        },
                        Err(error) => CallState::Fallback {
                            reason: error.to_string(),
                        },
                    }
                }
                CallState::Fallback { reason } => {
                    tracing::warn!(
                        stage = contract.name(),
                        role = %role,
                        reason = %reason,
                        "LLM call fell back to deterministic output"
                    );
                    warnings.push(
                        contract.name(),
                        WarningCode::LlmFallback,
                        format!("{} used fallback output: {reason}", contract.name()),
                    );
                    return Completion {
                        value: contract.fallback(),
                        source: CompletionSource::Fallback,
                        attempts,
                    };
                }
            };
        }
    }

    async fn send(&self, role: LlmRole, mut request: LlmRequest) -> Result<String, LlmError> {
        let binding = self.config.binding(role);
        if binding.backend == BackendKind::Disabled {
            return Err(LlmError::Unavailable(format!("role {role} is disabled")));
        }
        request.purpose = Some(role);
        request.model = Some(binding.model);
        request.temperature = Some(binding.temperature);
        request.max_tokens = Some(binding.max_tokens);
        self.backend.generate(request).await.map(|r| r.content)
    }

    fn first_request<C: ResponseContract>(&self, prompt: &Prompt, contract: &C) -> LlmRequest {
        LlmRequest::new(vec![ChatMessage::user(prompt.user.clone())])
            .with_system_prompt(system_prompt(prompt, contract))
            .with_json_mode()
    }

    fn correction_request<C: ResponseContract>(
        &self,
        prompt: &Prompt,
        contract: &C,
        previous: Option<String>,
        error: &str,
    ) -> LlmRequest {
        let mut messages = vec![ChatMessage::user(prompt.user.clone())];
        if let Some(previous) = previous {
            messages.push(ChatMessage::assistant(previous));
        }
        messages.push(ChatMessage::user(format!(
            "Your previous answer could not be used ({error}). \
             Reply again with only a JSON value of this shape: {}",
            contract.schema_hint()
        )));
        LlmRequest::new(messages)
            .with_system_prompt(system_prompt(prompt, contract))
            .with_json_mode()
    }
}

fn system_prompt<C: ResponseContract>(prompt: &Prompt, contract: &C) -> String {
    format!(
        "{}\n\nRespond with JSON only, matching: {}",
        prompt.system,
        contract.schema_hint()
    )
}

fn parse<C: ResponseContract>(contract: &C, raw: &str) -> Result<C::Output, String> {
    let output: C::Output = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    contract.validate(output)
}

fn parse_with_repair<C: ResponseContract>(contract: &C, raw: &str) -> Result<C::Output, String> {
    match parse(contract, raw) {
        Ok(value) => Ok(value),
        Err(error) => match repair_json(raw) {
            Some(fixed) => parse(contract, &fixed),
            None => Err(error),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::ports::LlmResponse;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Beats {
        beats: Vec<String>,
    }

    struct BeatsContract;

    impl ResponseContract for BeatsContract {
        type Output = Beats;

        fn name(&self) -> &'static str {
            "director"
        }

        fn schema_hint(&self) -> &'static str {
            r#"{"beats": [string]}"#
        }

        fn validate(&self, output: Beats) -> Result<Beats, String> {
            if output.beats.is_empty() {
                Err("no beats".to_owned())
            } else {
                Ok(output)
            }
        }

        fn fallback(&self) -> Beats {
            Beats {
                beats: vec!["hold".to_owned()],
            }
        }
    }

    /// Replays a fixed list of replies and records every request.
    struct ReplayLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ReplayLlm {
        fn new(replies: Vec<Result<&str, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_owned))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<LlmRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmPort for ReplayLlm {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra LLM call");
            reply.map(|content| LlmResponse {
                content,
                total_tokens: None,
            })
        }
    }

    fn wrapper(backend: Arc<ReplayLlm>) -> StructuredLlm {
        StructuredLlm::new(
            backend,
            Arc::new(LlmConfig::uniform(BackendKind::OpenAiCompatible)),
        )
    }

    fn prompt() -> Prompt {
        Prompt::new("You direct scenes.", "The player opens the door.")
    }

    #[tokio::test]
    async fn test_clean_output_is_used_on_first_attempt() {
        // Arrange
        let backend = Arc::new(ReplayLlm::new(vec![Ok(r#"{"beats": ["creak"]}"#)]));
        let mut warnings = Warnings::new();

        // Act
        let completion = wrapper(backend.clone())
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        // Assert
        assert_eq!(completion.source, CompletionSource::Primary);
        assert_eq!(completion.value.beats, vec!["creak"]);
        assert_eq!(completion.attempts, 1);
        assert!(warnings.is_empty());
        let request = &backend.requests()[0];
        assert!(request.json_mode);
        assert_eq!(request.temperature, Some(0.4));
    }

    #[tokio::test]
    async fn test_fenced_output_is_repaired_without_retry() {
        let backend = Arc::new(ReplayLlm::new(vec![Ok(
            "```json\n{\"beats\": [\"creak\",],}\n```",
        )]));
        let mut warnings = Warnings::new();

        let completion = wrapper(backend.clone())
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert_eq!(completion.source, CompletionSource::Repaired);
        assert_eq!(backend.requests().len(), 1);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_retry_carries_parse_error_and_previous_output() {
        let backend = Arc::new(ReplayLlm::new(vec![
            Ok("the door creaks"),
            Ok(r#"{"beats": ["creak"]}"#),
        ]));
        let mut warnings = Warnings::new();

        let completion = wrapper(backend.clone())
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert_eq!(completion.source, CompletionSource::Retried);
        assert_eq!(completion.attempts, 2);
        let retry = &backend.requests()[1];
        assert_eq!(retry.messages[1].content, "the door creaks");
        assert!(retry.messages[2].content.contains("could not be used"));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_two_failures_yield_fallback_and_exactly_one_warning() {
        let backend = Arc::new(ReplayLlm::new(vec![
            Ok("nope"),
            Ok(r#"{"beats": []}"#),
        ]));
        let mut warnings = Warnings::new();

        let completion = wrapper(backend)
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert!(completion.is_fallback());
        assert_eq!(completion.value, BeatsContract.fallback());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings.count_of(WarningCode::LlmFallback), 1);
    }

    #[tokio::test]
    async fn test_network_error_consumes_the_single_retry() {
        let backend = Arc::new(ReplayLlm::new(vec![
            Err(LlmError::Timeout("30s".into())),
            Err(LlmError::RequestFailed("connection refused".into())),
        ]));
        let mut warnings = Warnings::new();

        let completion = wrapper(backend.clone())
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert!(completion.is_fallback());
        assert_eq!(backend.requests().len(), 2);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_then_valid_retry_succeeds() {
        let backend = Arc::new(ReplayLlm::new(vec![
            Err(LlmError::Timeout("30s".into())),
            Ok(r#"{"beats": ["creak"]}"#),
        ]));
        let mut warnings = Warnings::new();

        let completion = wrapper(backend.clone())
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert_eq!(completion.source, CompletionSource::Retried);
        assert_eq!(backend.requests()[1].messages.len(), 2);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_role_falls_back_without_calling_backend() {
        let backend = Arc::new(ReplayLlm::new(Vec::new()));
        let mut config = LlmConfig::uniform(BackendKind::OpenAiCompatible);
        config.roles.get_mut(&LlmRole::Director).unwrap().backend = BackendKind::Disabled;
        let llm = StructuredLlm::new(backend.clone(), Arc::new(config));
        let mut warnings = Warnings::new();

        let completion = llm
            .complete(&prompt(), &BeatsContract, LlmRole::Director, &mut warnings)
            .await;

        assert!(completion.is_fallback());
        assert_eq!(completion.attempts, 0);
        assert!(backend.requests().is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
