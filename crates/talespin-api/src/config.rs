//! Process configuration, read once at startup.

use std::path::PathBuf;

use talespin_llm::LlmConfig;

use crate::error::AppError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    /// Optional YAML file with mechanics tuning.
    pub tuning_path: Option<PathBuf>,
    /// Optional era-pack YAML file.
    pub content_path: Option<PathBuf>,
    pub suggestion_count: Option<usize>,
    pub llm: LlmConfig,
}

impl AppConfig {
    /// Reads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for unparseable values.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = match non_empty("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?,
            None => 3000,
        };
        let suggestion_count = non_empty("TALESPIN_SUGGESTION_COUNT")
            .map(|value| {
                value.trim().parse().map_err(|e| {
                    AppError::Config(format!(
                        "TALESPIN_SUGGESTION_COUNT must be a positive integer: {e}"
                    ))
                })
            })
            .transpose()?;
        let llm = LlmConfig::from_lookup(&lookup).map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            database_url: non_empty("DATABASE_URL"),
            tuning_path: non_empty("TALESPIN_TUNING_PATH").map(PathBuf::from),
            content_path: non_empty("TALESPIN_CONTENT_PATH").map(PathBuf::from),
            suggestion_count,
            llm,
        })
    }
}
