//! Scene frame: where and when the narration happens, and who is there.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};

use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{SceneFrame, StageName, TurnState};

const MAX_DETAILS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct SceneReply {
    pub mood: String,
    #[serde(default)]
    pub sensory_details: Vec<String>,
}

struct SceneContract {
    mood: &'static str,
}

impl ResponseContract for SceneContract {
    type Output = SceneReply;

    fn name(&self) -> &'static str {
        StageName::SceneFrame.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"mood": "one or two words", "sensory_details": ["short phrase", "..."]}"#
    }

    fn validate(&self, mut output: SceneReply) -> Result<SceneReply, String> {
        if output.mood.trim().is_empty() {
            return Err("mood is empty".into());
        }
        output.sensory_details.retain(|d| !d.trim().is_empty());
        output.sensory_details.truncate(MAX_DETAILS);
        Ok(output)
    }

    fn fallback(&self) -> SceneReply {
        SceneReply {
            mood: self.mood.to_owned(),
            sensory_details: Vec::new(),
        }
    }
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=7 => "dawn",
        8..=11 => "morning",
        12..=16 => "afternoon",
        17..=19 => "evening",
        _ => "night",
    }
}

/// Frames the scene for the director and narrator.
pub struct SceneFrameStage;

#[async_trait]
impl Stage for SceneFrameStage {
    fn name(&self) -> StageName {
        StageName::SceneFrame
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let location = turn
            .resolve_location(ctx.content.as_ref(), self.name())
            .clone();
        let when = time_of_day(turn.hour_of_day(ctx.config.campaign_start_hour));
        let mut present: Vec<String> = turn.active_npcs.iter().map(|n| n.name.clone()).collect();
        let player_location = turn.snapshot.player().location_id.clone();
        present.extend(
            turn.snapshot
                .companions()
                .into_iter()
                .filter(|c| c.location_id == player_location)
                .map(|c| c.name.clone()),
        );

        let tension = turn.arc.as_ref().map_or(2, |a| a.tension);
        let contract = SceneContract {
            mood: if tension >= 6 || location.danger >= 3 {
                "tense"
            } else {
                "calm"
            },
        };
        let prompt = Prompt::new(
            format!("{} Set the mood of the scene in a few words.", preamble(ctx, turn)),
            format!(
                "Location: {} ({})\nTime: {when}\nPresent: {}\nTension: {tension}/10",
                location.name,
                location.description,
                present.join(", ")
            ),
        );
        let reply = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::SceneFrame, &mut turn.warnings)
            .await
            .value;

        turn.scene = Some(SceneFrame {
            location_name: location.name,
            description: location.description,
            time_of_day: when.to_owned(),
            present,
            mood: reply.mood.trim().to_owned(),
            sensory_details: reply.sensory_details,
        });
        Ok(())
    }
}
