//! A backend that refuses every call.

use async_trait::async_trait;

use crate::ports::{LlmError, LlmPort, LlmRequest, LlmResponse};

/// Backend used when no generation service is configured. Every stage then
/// runs on its deterministic fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

#[async_trait]
impl LlmPort for DisabledBackend {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Unavailable("no LLM backend configured".into()))
    }
}
