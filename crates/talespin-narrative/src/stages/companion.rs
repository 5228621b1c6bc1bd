//! Companion reaction: how the player's companions take what just happened.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_world_state::domain::events::{GameEvent, PsychShifted, RelationshipChanged};
use uuid::Uuid;

use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{CompanionReaction, StageName, TurnState};

/// Random stream for fallback reaction variance.
pub const REACTION_STREAM: &str = "companion.reaction";

const MAX_RELATIONSHIP_SHIFT: i32 = 5;
const MAX_STRESS_SHIFT: i32 = 10;

const APPROVING: &[&str] = &["{} nods approvingly.", "{} gives you a quick grin."];
const WORRIED: &[&str] = &["{} winces.", "{} mutters something under their breath."];
const NEUTRAL: &[&str] = &["{} keeps watch.", "{} listens quietly."];

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionReply {
    pub name: String,
    pub reaction: String,
    #[serde(default)]
    pub relationship_delta: i32,
    #[serde(default)]
    pub stress_delta: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanionReply {
    pub reactions: Vec<ReactionReply>,
}

struct CompanionContract {
    fallback: Vec<CompanionReaction>,
}

impl ResponseContract for CompanionContract {
    type Output = CompanionReply;

    fn name(&self) -> &'static str {
        StageName::CompanionReaction.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"reactions": [{"name": string, "reaction": "one sentence", "relationship_delta": integer -5..5, "stress_delta": integer -10..10}]}"#
    }

    fn validate(&self, output: CompanionReply) -> Result<CompanionReply, String> {
        for reaction in &output.reactions {
            if !self
                .fallback
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&reaction.name))
            {
                return Err(format!("{} is not a companion", reaction.name));
            }
            if reaction.relationship_delta.abs() > MAX_RELATIONSHIP_SHIFT
                || reaction.stress_delta.abs() > MAX_STRESS_SHIFT
            {
                return Err(format!("{}'s shifts are out of range", reaction.name));
            }
        }
        Ok(output)
    }

    fn fallback(&self) -> CompanionReply {
        CompanionReply {
            reactions: self
                .fallback
                .iter()
                .map(|c| ReactionReply {
                    name: c.name.clone(),
                    reaction: c.reaction.clone(),
                    relationship_delta: 0,
                    stress_delta: 0,
                })
                .collect(),
        }
    }
}

/// Lets every living companion react to the player's input.
pub struct CompanionReactionStage;

#[async_trait]
impl Stage for CompanionReactionStage {
    fn name(&self) -> StageName {
        StageName::CompanionReaction
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let companions: Vec<(Uuid, String, i32)> = turn
            .snapshot
            .companions()
            .into_iter()
            .map(|c| (c.character_id, c.name.clone(), c.relationship))
            .collect();
        if companions.is_empty() {
            return Ok(());
        }

        let templates = match turn.mechanic.as_ref().map(|m| m.roll.tier.is_success()) {
            Some(true) => APPROVING,
            Some(false) => WORRIED,
            None => NEUTRAL,
        };
        let mut rng = ctx.rng.stream(&turn.seed(REACTION_STREAM));
        let last = u32::try_from(templates.len() - 1).unwrap_or(0);
        let fallback: Vec<CompanionReaction> = companions
            .iter()
            .map(|(id, name, _)| {
                let index = rng.next_u32_range(0, last) as usize;
                CompanionReaction {
                    companion_id: *id,
                    name: name.clone(),
                    reaction: templates[index.min(templates.len() - 1)].replace("{}", name),
                    relationship_delta: 0,
                    stress_delta: 0,
                }
            })
            .collect();

        let facts = turn.mechanical_facts().join("; ");
        let prompt = Prompt::new(
            format!(
                "{} Write each companion's in-character reaction to the player's action.",
                preamble(ctx, turn)
            ),
            format!(
                "Player: {}\nOutcome: {}\nCompanions (name, relationship): {}",
                turn.user_input,
                if facts.is_empty() { "no check" } else { &facts },
                companions
                    .iter()
                    .map(|(_, name, rel)| format!("{name} ({rel})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );
        let contract = CompanionContract { fallback };
        let reply = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::Companion, &mut turn.warnings)
            .await
            .value;

        let reactions: Vec<CompanionReaction> = contract
            .fallback
            .into_iter()
            .map(|default| {
                match reply
                    .reactions
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(&default.name))
                {
                    Some(r) => CompanionReaction {
                        reaction: r.reaction.trim().to_owned(),
                        relationship_delta: r.relationship_delta,
                        stress_delta: r.stress_delta,
                        ..default
                    },
                    None => default,
                }
            })
            .collect();

        for reaction in &reactions {
            if reaction.relationship_delta != 0 {
                turn.pending_events
                    .push(GameEvent::RelationshipChanged(RelationshipChanged {
                        character_id: reaction.companion_id,
                        delta: reaction.relationship_delta,
                        reason: format!("reacted to: {}", turn.user_input),
                    }));
            }
            if reaction.stress_delta != 0 {
                turn.pending_events.push(GameEvent::PsychShifted(PsychShifted {
                    character_id: reaction.companion_id,
                    mood: None,
                    stress_delta: reaction.stress_delta,
                    trauma_flag: None,
                }));
            }
        }
        turn.companion_reactions = reactions;
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
    async fn test_model_reactions_become_relationship_events() {
        // Arrange
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Companion,
            r#"{"reactions": [{"name": "mira", "reaction": "Mira laughs.", "relationship_delta": 2, "stress_delta": -3}]}"#,
        ));
        let ctx = testing::context(llm);
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mira = testing::seed("Mira", CharacterRole::Companion, "docks");
        let mut turn = testing::turn(&[player, mira], "tell a joke");

        // Act
        CompanionReactionStage.run(&ctx, &mut turn).await.unwrap();

        // Assert
        assert_eq!(turn.companion_reactions.len(), 1);
        assert_eq!(turn.companion_reactions[0].reaction, "Mira laughs.");
        assert_eq!(turn.pending_events.len(), 2);
        assert!(turn.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_reaction_is_deterministic_and_harmless() {
        let ctx = testing::context(Arc::new(UnreachableLlm::new()));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mira = testing::seed("Mira", CharacterRole::Companion, "docks");
        let mut first = testing::turn(&[player, mira], "wait");
        let mut second = first.clone();

        CompanionReactionStage.run(&ctx, &mut first).await.unwrap();
        CompanionReactionStage.run(&ctx, &mut second).await.unwrap();

        assert_eq!(first.companion_reactions, second.companion_reactions);
        assert!(first.companion_reactions[0].reaction.starts_with("Mira"));
        assert!(first.pending_events.is_empty());
        assert_eq!(first.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_no_companions_no_call() {
        let llm = Arc::new(UnreachableLlm::new());
        let ctx = testing::context(llm.clone());
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        CompanionReactionStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(llm.call_count(), 0);
    }
}
