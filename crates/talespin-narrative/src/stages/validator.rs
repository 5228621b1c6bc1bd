//! Narrative validator: keeps the prose consistent with the state.
//!
//! The deterministic checks always run and may rewrite the narration. The
//! model review is advisory: its issues become validation notes.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_core::warnings::WarningCode;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_world_state::domain::events::GameEvent;

use super::narrator::{template_narration, truncate_at_sentence};
use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{StageName, TurnState};

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewReply {
    pub consistent: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

struct ReviewContract;

impl ResponseContract for ReviewContract {
    type Output = ReviewReply;

    fn name(&self) -> &'static str {
        StageName::NarrativeValidator.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"consistent": boolean, "issues": [string]}"#
    }

    fn fallback(&self) -> ReviewReply {
        ReviewReply {
            consistent: true,
            issues: Vec::new(),
        }
    }
}

/// Splits prose into sentences, keeping terminators.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (index, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = index + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Drops every sentence that leaks one of `secrets`. Returns the new text and
/// how many sentences were removed.
fn redact(text: &str, secrets: &[String]) -> (String, usize) {
    let all = sentences(text);
    let kept: Vec<&str> = all
        .iter()
        .copied()
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            !secrets.iter().any(|secret| lower.contains(secret.as_str()))
        })
        .collect();
    let removed = all.len() - kept.len();
    (kept.join(" "), removed)
}

/// Checks and, where needed, repairs the narration.
pub struct NarrativeValidatorStage;

#[async_trait]
impl Stage for NarrativeValidatorStage {
    fn name(&self) -> StageName {
        StageName::NarrativeValidator
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let secrets: Vec<String> = turn
            .snapshot
            .projection
            .characters
            .values()
            .filter(|c| c.character_id != turn.player_id)
            .filter_map(|c| c.secret_agenda.as_deref())
            .chain(turn.pending_events.iter().filter_map(|e| match e {
                GameEvent::NpcSpawned(spawned) => spawned.character.secret_agenda.as_deref(),
                _ => None,
            }))
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.len() >= 8)
            .collect();

        let (redacted, removed) = redact(&turn.narration, &secrets);
        if removed > 0 {
            turn.validation_notes
                .push(format!("removed {removed} sentence(s) revealing a secret agenda"));
            turn.warnings.push(
                self.name().as_str(),
                WarningCode::NarrationRewritten,
                "narration revealed a secret agenda and was redacted",
            );
            turn.narration = redacted;
        }
        if turn.narration.trim().is_empty() {
            turn.validation_notes
                .push("narration was empty; replaced with template".to_owned());
            turn.warnings.push(
                self.name().as_str(),
                WarningCode::NarrationRewritten,
                "narration was empty and was replaced",
            );
            turn.narration = template_narration(turn);
            turn.narration_is_fallback = true;
        }
        turn.narration = truncate_at_sentence(&turn.narration, ctx.config.narration_char_cap);

        let lower = turn.narration.to_lowercase();
        for hit in turn.mechanic.iter().flat_map(|m| &m.events) {
            if let GameEvent::CombatHit(hit) = hit {
                if !hit.target_name.is_empty() && !lower.contains(&hit.target_name.to_lowercase()) {
                    turn.validation_notes
                        .push(format!("narration does not name the target {}", hit.target_name));
                }
            }
        }

        if turn.narration_is_fallback {
            return Ok(());
        }
        let prompt = Prompt::new(
            format!(
                "{} Check the narration against the established facts. Report contradictions only.",
                preamble(ctx, turn)
            ),
            format!(
                "Facts: {}\nNarration: {}",
                turn.mechanical_facts().join("; "),
                turn.narration
            ),
        );
        let review = ctx
            .llm
            .complete(&prompt, &ReviewContract, LlmRole::Validator, &mut turn.warnings)
            .await
            .value;
        if !review.consistent {
            turn.validation_notes
                .extend(review.issues.into_iter().map(|issue| format!("review: {issue}")));
        }
        Ok(())
    }
}
