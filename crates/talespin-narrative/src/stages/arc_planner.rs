//! Arc planner: where the story should lean next.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_rules::OutcomeTier;
use talespin_world_state::domain::events::{GameEvent, QuestStatus, QuestUpdated};
use talespin_world_state::domain::projection::QuestEntry;

use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{ArcGuidance, StageName, TurnState};

#[derive(Debug, Clone, Deserialize)]
pub struct QuestUpdateReply {
    pub quest_id: String,
    pub status: QuestStatus,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArcReply {
    pub beat: String,
    pub tension: u8,
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub quest_update: Option<QuestUpdateReply>,
}

struct ArcContract {
    open_quests: Vec<QuestEntry>,
    fallback: ArcGuidance,
}

impl ResponseContract for ArcContract {
    type Output = ArcReply;

    fn name(&self) -> &'static str {
        StageName::ArcPlanner.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"beat": "next story beat", "tension": integer 1..10, "hooks": [string], "quest_update": {"quest_id": string, "status": "available|active|completed|failed", "stage": string | null} | null}"#
    }

    fn validate(&self, output: ArcReply) -> Result<ArcReply, String> {
        if output.beat.trim().is_empty() {
            return Err("beat is empty".into());
        }
        if !(1..=10).contains(&output.tension) {
            return Err(format!("tension {} out of range", output.tension));
        }
        if let Some(update) = &output.quest_update {
            if !self.open_quests.iter().any(|q| q.quest_id == update.quest_id) {
                return Err(format!("quest {} is not open", update.quest_id));
            }
        }
        Ok(output)
    }

    fn fallback(&self) -> ArcReply {
        ArcReply {
            beat: self.fallback.beat.clone(),
            tension: self.fallback.tension,
            hooks: self.fallback.hooks.clone(),
            quest_update: None,
        }
    }
}

fn baseline(turn: &TurnState, open_quests: &[QuestEntry]) -> ArcGuidance {
    let danger = turn.location.as_ref().map_or(0, |l| l.danger);
    let pressure = match turn.mechanic.as_ref().map(|m| m.roll.tier) {
        Some(OutcomeTier::CriticalFailure) => 3,
        Some(OutcomeTier::Failure) => 1,
        _ => 0,
    };
    let arrivals = u8::from(turn.active_npcs.iter().any(|n| n.newly_arrived));
    ArcGuidance {
        beat: open_quests.first().map_or_else(
            || "let the player explore and set their own goals".to_owned(),
            |quest| format!("nudge toward {}", quest.title),
        ),
        tension: (2 + danger + pressure + arrivals).clamp(1, 10),
        hooks: Vec::new(),
    }
}

/// Sets the beat and tension; may advance an open quest.
pub struct ArcPlannerStage;

#[async_trait]
impl Stage for ArcPlannerStage {
    fn name(&self) -> StageName {
        StageName::ArcPlanner
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let open_quests: Vec<QuestEntry> = turn
            .snapshot
            .projection
            .quests
            .values()
            .filter(|q| matches!(q.status, QuestStatus::Active | QuestStatus::Available))
            .cloned()
            .collect();
        let fallback = baseline(turn, &open_quests);

        let prompt = Prompt::new(
            format!(
                "{} Plan the next story beat. Only update a quest when this turn clearly \
                 moved it.",
                preamble(ctx, turn)
            ),
            format!(
                "Player: {}\nOutcome: {}\nOpen quests: {}\nWorld: {}",
                turn.user_input,
                turn.mechanical_facts().join("; "),
                open_quests
                    .iter()
                    .map(|q| format!(
                        "{} \"{}\" ({})",
                        q.quest_id,
                        q.title,
                        q.stage.as_deref().unwrap_or("start")
                    ))
                    .collect::<Vec<_>>()
                    .join(", "),
                turn.world_notes.join("; ")
            ),
        );
        let contract = ArcContract {
            open_quests,
            fallback,
        };
        let reply = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::ArcPlanner, &mut turn.warnings)
            .await
            .value;

        if let Some(update) = reply.quest_update {
            if let Some(quest) = contract
                .open_quests
                .iter()
                .find(|q| q.quest_id == update.quest_id)
            {
                turn.pending_events.push(GameEvent::QuestUpdated(QuestUpdated {
                    quest_id: quest.quest_id.clone(),
                    title: quest.title.clone(),
                    status: update.status,
                    stage: update.stage.or_else(|| quest.stage.clone()),
                }));
            }
        }
        turn.arc = Some(ArcGuidance {
            beat: reply.beat,
            tension: reply.tension,
            hooks: reply.hooks,
        });
        Ok(())
    }
}
