//! Talespin LLM: the call wrapper every generating stage goes through.
//!
//! Stages never talk to a backend directly. They describe the structured
//! shape they expect with a [`ResponseContract`], including a deterministic
//! fallback, and [`StructuredLlm::complete`] runs the
//! attempt/repair/retry/fallback protocol on their behalf.

pub mod config;
pub mod disabled;
pub mod openai;
pub mod ports;
pub mod repair;
pub mod structured;

pub use config::{BackendKind, LlmConfig, LlmRole, RoleBinding};
pub use ports::{ChatMessage, LlmError, LlmPort, LlmRequest, LlmResponse, MessageRole};
pub use structured::{Completion, CompletionSource, Prompt, ResponseContract, StructuredLlm};
