//! Per-role backend and model selection.
//!
//! Built once at process start and shared by reference with the wrapper.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default base URL for an OpenAI-compatible backend.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// The pipeline roles that call the wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    /// Action classification refinement.
    Router,
    /// Encounter spawning.
    Encounter,
    /// Off-screen world simulation.
    WorldSim,
    /// Companion reactions.
    Companion,
    /// Story arc planning.
    ArcPlanner,
    /// Scene framing.
    SceneFrame,
    /// Beat direction.
    Director,
    /// Prose narration.
    Narrator,
    /// Narrative validation.
    Validator,
    /// Suggested actions.
    Suggestions,
}

impl LlmRole {
    /// Every role, in pipeline order.
    pub const ALL: [LlmRole; 10] = [
        LlmRole::Router,
        LlmRole::Encounter,
        LlmRole::WorldSim,
        LlmRole::Companion,
        LlmRole::ArcPlanner,
        LlmRole::SceneFrame,
        LlmRole::Director,
        LlmRole::Narrator,
        LlmRole::Validator,
        LlmRole::Suggestions,
    ];

    /// Stable identifier used in logs and warnings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LlmRole::Router => "router",
            LlmRole::Encounter => "encounter",
            LlmRole::WorldSim => "world_sim",
            LlmRole::Companion => "companion",
            LlmRole::ArcPlanner => "arc_planner",
            LlmRole::SceneFrame => "scene_frame",
            LlmRole::Director => "director",
            LlmRole::Narrator => "narrator",
            LlmRole::Validator => "validator",
            LlmRole::Suggestions => "suggestions",
        }
    }

    fn env_prefix(self) -> String {
        format!("TALESPIN_LLM_{}", self.as_str().to_ascii_uppercase())
    }

    fn default_temperature(self) -> f32 {
        match self {
            LlmRole::Router | LlmRole::Validator => 0.0,
            LlmRole::Narrator => 0.8,
            LlmRole::Suggestions | LlmRole::Companion => 0.7,
            _ => 0.4,
        }
    }

    fn default_max_tokens(self) -> u32 {
        match self {
            LlmRole::Narrator => 700,
            LlmRole::Router => 120,
            _ => 400,
        }
    }
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend serves a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// An HTTP service speaking the OpenAI chat-completions protocol.
    OpenAiCompatible,
    /// No backend: calls fail immediately and stages use their fallbacks.
    Disabled,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai_compatible" | "ollama" => Some(Self::OpenAiCompatible),
            "disabled" | "none" | "off" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Backend and sampling parameters for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// Serving backend.
    pub backend: BackendKind,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
}

/// Invalid LLM configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    /// Variable name.
    pub key: String,
    /// Rejected value.
    pub value: String,
}

/// Typed role → backend table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible backend.
    pub base_url: String,
    /// Bearer token, if the backend needs one.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Role bindings. Every role is present.
    pub roles: BTreeMap<LlmRole, RoleBinding>,
}

impl LlmConfig {
    /// Every role bound to `backend` with default model and sampling.
    #[must_use]
    pub fn uniform(backend: BackendKind) -> Self {
        let roles = LlmRole::ALL
            .into_iter()
            .map(|role| {
                (
                    role,
                    RoleBinding {
                        backend,
                        model: DEFAULT_MODEL.to_owned(),
                        temperature: role.default_temperature(),
                        max_tokens: role.default_max_tokens(),
                    },
                )
            })
            .collect();
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            roles,
        }
    }

    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// `TALESPIN_LLM_BACKEND` defaults to the OpenAI-compatible backend when
    /// `TALESPIN_LLM_BASE_URL` is set and to `disabled` otherwise. Every role
    /// can override `_BACKEND`, `_MODEL`, `_TEMPERATURE` and `_MAX_TOKENS`
    /// under `TALESPIN_LLM_<ROLE>`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("TALESPIN_LLM_BASE_URL");
        let default_backend = match lookup("TALESPIN_LLM_BACKEND") {
            Some(value) => parse_backend("TALESPIN_LLM_BACKEND", &value)?,
            None if base_url.is_some() => BackendKind::OpenAiCompatible,
            None => BackendKind::Disabled,
        };
        let default_model = lookup("TALESPIN_LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let timeout_secs = match lookup("TALESPIN_LLM_TIMEOUT_SECS") {
            Some(value) => parse_number("TALESPIN_LLM_TIMEOUT_SECS", &value)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let mut roles = BTreeMap::new();
        for role in LlmRole::ALL {
            let prefix = role.env_prefix();
            let key = |suffix: &str| format!("{prefix}_{suffix}");
            let backend = match lookup(&key("BACKEND")) {
                Some(value) => parse_backend(&key("BACKEND"), &value)?,
                None => default_backend,
            };
            let temperature = match lookup(&key("TEMPERATURE")) {
                Some(value) => parse_number(&key("TEMPERATURE"), &value)?,
                None => role.default_temperature(),
            };
            let max_tokens = match lookup(&key("MAX_TOKENS")) {
                Some(value) => parse_number(&key("MAX_TOKENS"), &value)?,
                None => role.default_max_tokens(),
            };
            roles.insert(
                role,
                RoleBinding {
                    backend,
                    model: lookup(&key("MODEL")).unwrap_or_else(|| default_model.clone()),
                    temperature,
                    max_tokens,
                },
            );
        }

        Ok(Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            api_key: lookup("TALESPIN_LLM_API_KEY").filter(|k| !k.is_empty()),
            timeout_secs,
            roles,
        })
    }

    /// The binding for `role`. Roles missing from a hand-built table are
    /// treated as disabled.
    #[must_use]
    pub fn binding(&self, role: LlmRole) -> RoleBinding {
        self.roles.get(&role).cloned().unwrap_or(RoleBinding {
            backend: BackendKind::Disabled,
            model: DEFAULT_MODEL.to_owned(),
            temperature: role.default_temperature(),
            max_tokens: role.default_max_tokens(),
        })
    }

    /// Whether any role needs the HTTP backend.
    #[must_use]
    pub fn uses_http(&self) -> bool {
        self.roles
            .values()
            .any(|b| b.backend == BackendKind::OpenAiCompatible)
    }
}

fn parse_backend(key: &str, value: &str) -> Result<BackendKind, ConfigError> {
    BackendKind::parse(value).ok_or_else(|| ConfigError {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_base_url_disables_every_role() {
        let config = LlmConfig::from_lookup(lookup_from(&[])).unwrap();

        assert!(!config.uses_http());
        assert_eq!(config.roles.len(), LlmRole::ALL.len());
        assert_eq!(config.binding(LlmRole::Narrator).backend, BackendKind::Disabled);
    }

    #[test]
    fn test_role_overrides_apply_to_that_role_only() {
        let config = LlmConfig::from_lookup(lookup_from(&[
            ("TALESPIN_LLM_BASE_URL", "http://llm.local:8000/"),
            ("TALESPIN_LLM_MODEL", "base-model"),
            ("TALESPIN_LLM_NARRATOR_MODEL", "prose-model"),
            ("TALESPIN_LLM_ROUTER_BACKEND", "disabled"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://llm.local:8000");
        assert_eq!(config.binding(LlmRole::Narrator).model, "prose-model");
        assert_eq!(config.binding(LlmRole::Director).model, "base-model");
        assert_eq!(config.binding(LlmRole::Router).backend, BackendKind::Disabled);
        assert_eq!(
            config.binding(LlmRole::Director).backend,
            BackendKind::OpenAiCompatible
        );
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let result = LlmConfig::from_lookup(lookup_from(&[(
            "TALESPIN_LLM_NARRATOR_TEMPERATURE",
            "warm",
        )]));

        let err = result.unwrap_err();
        assert_eq!(err.key, "TALESPIN_LLM_NARRATOR_TEMPERATURE");
    }

    #[test]
    fn test_missing_role_in_hand_built_table_is_disabled() {
        let mut config = LlmConfig::uniform(BackendKind::OpenAiCompatible);
        config.roles.remove(&LlmRole::Suggestions);

        assert_eq!(
            config.binding(LlmRole::Suggestions).backend,
            BackendKind::Disabled
        );
    }
}
