//! Suggestion refiner: exactly `n` next actions for the player.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_core::warnings::WarningCode;
use talespin_llm::{LlmRole, Prompt, ResponseContract};

use super::{Stage, StageContext, preamble};
use crate::domain::suggestions::normalize;
use crate::domain::turn_state::{StageName, TurnState};

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionsReply {
    pub suggestions: Vec<String>,
}

struct SuggestionsContract {
    defaults: Vec<String>,
}

impl ResponseContract for SuggestionsContract {
    type Output = SuggestionsReply;

    fn name(&self) -> &'static str {
        StageName::SuggestionRefiner.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"suggestions": ["short imperative action", "..."]}"#
    }

    fn fallback(&self) -> SuggestionsReply {
        SuggestionsReply {
            suggestions: self.defaults.clone(),
        }
    }
}

/// State-derived suggestions used to pad or replace generated ones.
#[must_use]
pub fn default_suggestions(turn: &TurnState) -> Vec<String> {
    let mut defaults = Vec::new();
    if let Some(npc) = turn.active_npcs.first() {
        defaults.push(format!("Talk to {}", npc.name));
    }
    if turn
        .mechanic
        .as_ref()
        .is_some_and(|m| !m.roll.tier.is_success())
    {
        defaults.push("Try again more carefully".to_owned());
    }
    if let Some(next) = turn.location.as_ref().and_then(|l| l.connections.first()) {
        defaults.push(format!("Head to {}", next.replace('_', " ")));
    }
    if let Some(companion) = turn.companion_reactions.first() {
        defaults.push(format!("Ask {} what they think", companion.name));
    }
    defaults.push("Look around".to_owned());
    defaults
}

/// Produces the final suggestion list.
pub struct SuggestionRefinerStage;

#[async_trait]
impl Stage for SuggestionRefinerStage {
    fn name(&self) -> StageName {
        StageName::SuggestionRefiner
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let n = ctx.config.suggestion_count;
        let defaults = default_suggestions(turn);
        let prompt = Prompt::new(
            format!(
                "{} Suggest exactly {n} distinct, short next actions for the player.",
                preamble(ctx, turn)
            ),
            format!(
                "Narration: {}\nBeat: {}\nPresent: {}",
                turn.narration,
                turn.arc.as_ref().map_or("", |a| a.beat.as_str()),
                turn.active_npcs
                    .iter()
                    .map(|n| n.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );
        let contract = SuggestionsContract {
            defaults: defaults.clone(),
        };
        let completion = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::Suggestions, &mut turn.warnings)
            .await;

        let from_model = !completion.is_fallback();
        let offered = completion.value.suggestions.len();
        let (suggestions, adjusted) = normalize(completion.value.suggestions, &defaults, n);
        if from_model && adjusted {
            turn.warnings.push(
                self.name().as_str(),
                WarningCode::SuggestionsAdjusted,
                format!("model offered {offered} usable suggestion(s); list fitted to {n}"),
            );
        }
        turn.suggestions = suggestions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use talespin_test_support::{ScriptedLlm, UnreachableLlm};
    use talespin_world_state::domain::events::CharacterRole;

    use super::*;
    use crate::stages::testing;

    #[tokio::test]
    async fn test_short_list_is_padded_and_flagged() {
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Suggestions,
            r#"{"suggestions": ["Follow the smuggler", "follow the smuggler"]}"#,
        ));
        let ctx = testing::context(llm);
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        SuggestionRefinerStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.suggestions.len(), 4);
        assert_eq!(turn.suggestions[0], "Follow the smuggler");
        assert_eq!(turn.warnings.count_of(WarningCode::SuggestionsAdjusted), 1);
    }

    #[tokio::test]
    async fn test_unreachable_model_still_yields_exact_count() {
        let mut ctx = testing::context(Arc::new(UnreachableLlm::new()));
        ctx.config.suggestion_count = 6;
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        SuggestionRefinerStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.suggestions.len(), 6);
        assert_eq!(turn.warnings.len(), 1);
        assert_eq!(turn.warnings.count_of(WarningCode::LlmFallback), 1);
    }
}
