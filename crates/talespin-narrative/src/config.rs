//! Pipeline tuning.

use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;

/// Knobs of the turn pipeline, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Exact number of suggested actions in every turn result.
    pub suggestion_count: usize,
    /// Approximate token budget for retrieved lore per turn.
    pub context_token_budget: usize,
    /// Maximum retrieved snippets per turn.
    pub retrieval_top_k: usize,
    /// Whether the router asks the model to refine its keyword classification.
    pub router_llm: bool,
    /// Narration longer than this many characters is cut at a sentence end.
    pub narration_char_cap: usize,
    /// The world simulation ticks on every n-th turn.
    pub world_sim_every: u32,
    /// Minutes a turn without a mechanical check takes.
    pub talk_time_minutes: u32,
    /// In-world hour at minute zero of a campaign.
    pub campaign_start_hour: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            suggestion_count: 4,
            context_token_budget: 600,
            retrieval_top_k: 4,
            router_llm: true,
            narration_char_cap: 1800,
            world_sim_every: 3,
            talk_time_minutes: 5,
            campaign_start_hour: 8,
        }
    }
}

impl PipelineConfig {
    /// Checks the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the first bad field.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.suggestion_count == 0 {
            return Err(DomainError::Validation(
                "suggestion_count must be at least 1".into(),
            ));
        }
        if self.world_sim_every == 0 {
            return Err(DomainError::Validation(
                "world_sim_every must be at least 1".into(),
            ));
        }
        if self.narration_char_cap < 80 {
            return Err(DomainError::Validation(
                "narration_char_cap must be at least 80".into(),
            ));
        }
        if self.campaign_start_hour >= 24 {
            return Err(DomainError::Validation(
                "campaign_start_hour must be below 24".into(),
            ));
        }
        Ok(())
    }
}
