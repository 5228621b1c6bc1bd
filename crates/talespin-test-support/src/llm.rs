//! Test LLM backends.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use talespin_llm::{LlmError, LlmPort, LlmRequest, LlmResponse, LlmRole};

/// A backend that answers from per-role scripts.
///
/// Each role has a queue of replies; the last reply of a queue repeats once
/// the others are used up. Roles without a script get an unparseable reply,
/// so their stages exercise the fallback path.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    scripts: Mutex<HashMap<LlmRole, VecDeque<String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    /// Creates a backend with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for `role`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn reply(self, role: LlmRole, content: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(content.into());
        self
    }

    /// Every request received, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests issued for `role`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls_for(&self, role: LlmRole) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == Some(role))
            .count()
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let role = request.purpose;
        self.requests.lock().unwrap().push(request);
        let mut scripts = self.scripts.lock().unwrap();
        let content = role
            .and_then(|role| scripts.get_mut(&role))
            .and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or_else(|| "no scripted reply".to_owned());
        Ok(LlmResponse {
            content,
            total_tokens: None,
        })
    }
}

/// A backend whose every request fails with a network error.
#[derive(Debug, Default)]
pub struct UnreachableLlm {
    calls: AtomicU32,
}

impl UnreachableLlm {
    /// Creates the backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests attempted.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmPort for UnreachableLlm {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::RequestFailed(
            "error sending request: connection refused".into(),
        ))
    }
}
