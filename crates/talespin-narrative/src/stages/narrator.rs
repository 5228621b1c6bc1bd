//! Narrator: the prose of the turn.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_rules::OutcomeTier;

use super::{Stage, StageContext, preamble};
use crate::domain::route::RouteClass;
use crate::domain::turn_state::{StageName, TurnState, tier_phrase};

#[derive(Debug, Clone, Deserialize)]
pub struct NarratorReply {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

struct NarratorContract {
    known_sources: Vec<String>,
    fallback_text: String,
}

impl ResponseContract for NarratorContract {
    type Output = NarratorReply;

    fn name(&self) -> &'static str {
        StageName::Narrator.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"text": "the narration, second person", "citations": ["ids of lore snippets used"]}"#
    }

    fn validate(&self, mut output: NarratorReply) -> Result<NarratorReply, String> {
        if output.text.trim().is_empty() {
            return Err("narration is empty".into());
        }
        output.citations.retain(|c| self.known_sources.contains(c));
        output.citations.dedup();
        Ok(output)
    }

    fn fallback(&self) -> NarratorReply {
        NarratorReply {
            text: self.fallback_text.clone(),
            citations: Vec::new(),
        }
    }
}

/// Cuts `text` to at most `cap` characters, preferring a sentence end.
#[must_use]
pub fn truncate_at_sentence(text: &str, cap: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= cap {
        return text.to_owned();
    }
    let head: String = text.chars().take(cap).collect();
    match head.rfind(['.', '!', '?']) {
        Some(end) if end > cap / 3 => head[..=end].to_owned(),
        _ => format!("{}…", head.trim_end()),
    }
}

/// Deterministic prose assembled from what the turn established.
#[must_use]
pub fn template_narration(turn: &TurnState) -> String {
    let mut sentences: Vec<String> = Vec::new();
    if let Some(scene) = &turn.scene {
        sentences.push(format!(
            "It is {} at {}.",
            scene.time_of_day, scene.location_name
        ));
    }
    match (&turn.mechanic, turn.route_class()) {
        (Some(outcome), _) => {
            let verb = match outcome.roll.tier {
                OutcomeTier::CriticalSuccess | OutcomeTier::Success => "succeeds",
                OutcomeTier::Failure | OutcomeTier::CriticalFailure => "falls short",
            };
            sentences.push(format!(
                "You try to {}, and it {verb}: {}.",
                outcome.action_type.as_str().replace('_', " "),
                tier_phrase(outcome.roll.tier)
            ));
            sentences.extend(turn.mechanical_facts().into_iter().skip(1).map(|fact| {
                let mut chars = fact.chars();
                match chars.next() {
                    Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
                    None => String::new(),
                }
            }));
        }
        (None, RouteClass::Talk) => {
            sentences.push("Your words hang in the air for a moment.".to_owned());
        }
        (None, _) => sentences.push("You take a moment.".to_owned()),
    }
    if let Some(note) = &turn.encounter_note {
        sentences.push(note.clone());
    }
    sentences.extend(turn.companion_reactions.iter().map(|r| r.reaction.clone()));
    sentences.retain(|s| !s.is_empty());
    sentences.join(" ")
}

/// Writes the turn's narration.
pub struct NarratorStage;

#[async_trait]
impl Stage for NarratorStage {
    fn name(&self) -> StageName {
        StageName::Narrator
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let brief = turn.director.as_ref().map(|d| {
            format!(
                "Focus: {}\nPacing: {}\nMust mention: {}\nAvoid: {}",
                d.focus,
                d.pacing,
                d.must_mention.join("; "),
                d.avoid.join("; ")
            )
        });
        let scene = turn.scene.as_ref().map(|s| {
            format!(
                "{} ({}), {}, mood {}. Present: {}. Details: {}",
                s.location_name,
                s.description,
                s.time_of_day,
                s.mood,
                s.present.join(", "),
                s.sensory_details.join("; ")
            )
        });
        let lore = turn
            .context
            .iter()
            .map(|s| format!("[{}] {}", s.source_id, s.text))
            .collect::<Vec<_>>()
            .join("\n");
        let reactions = turn
            .companion_reactions
            .iter()
            .map(|r| r.reaction.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let prompt = Prompt::new(
            format!(
                "{} Narrate the outcome of the player's turn in second person, in at most \
                 {} characters. Never contradict the established facts. Cite lore ids you use.",
                preamble(ctx, turn),
                ctx.config.narration_char_cap
            ),
            format!(
                "Player: {}\nScene: {}\nBrief:\n{}\nArrival: {}\nCompanions: {}\nLore:\n{}",
                turn.user_input,
                scene.unwrap_or_default(),
                brief.unwrap_or_default(),
                turn.encounter_note.as_deref().unwrap_or("none"),
                reactions,
                lore
            ),
        );
        let contract = NarratorContract {
            known_sources: turn.context.iter().map(|s| s.source_id.clone()).collect(),
            fallback_text: template_narration(turn),
        };
        let completion = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::Narrator, &mut turn.warnings)
            .await;

        turn.narration_is_fallback = completion.is_fallback();
        turn.narration = truncate_at_sentence(&completion.value.text, ctx.config.narration_char_cap);
        turn.citations = completion.value.citations;
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

    #[test]
    fn test_truncate_prefers_sentence_end() {
        let text = "The fog thickens. A bell rings somewhere far off across the water.";

        assert_eq!(truncate_at_sentence(text, 40), "The fog thickens.");
        assert_eq!(truncate_at_sentence("short", 40), "short");
    }

    #[tokio::test]
    async fn test_unreachable_model_yields_template_prose() {
        let ctx = testing::context(Arc::new(UnreachableLlm::new()));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "\"Anyone here?\"");

        NarratorStage.run(&ctx, &mut turn).await.unwrap();

        assert!(turn.narration_is_fallback);
        assert!(!turn.narration.is_empty());
        assert_eq!(turn.warnings.len(), 1);
        assert_eq!(turn.warnings.iter().next().unwrap().source, "narrator");
    }

    #[tokio::test]
    async fn test_unknown_citations_are_dropped() {
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Narrator,
            r#"{"text": "You wait. Nothing stirs.", "citations": ["made_up"]}"#,
        ));
        let ctx = testing::context(llm);
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        NarratorStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.narration, "You wait. Nothing stirs.");
        assert!(turn.citations.is_empty());
        assert!(!turn.narration_is_fallback);
    }
}
