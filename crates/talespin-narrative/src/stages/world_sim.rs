//! World simulation: off-screen faction drift and rumors, on a cadence.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_world_state::domain::events::{FactionStandingChanged, GameEvent, RumorSpread};
use tracing::debug;

use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{StageName, TurnState};

const MAX_FACTION_SHIFT: i32 = 5;
const MAX_RUMOR_CHARS: usize = 240;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactionShift {
    pub faction: String,
    pub delta: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldReply {
    #[serde(default)]
    pub rumor: Option<String>,
    #[serde(default)]
    pub faction_shifts: Vec<FactionShift>,
}

struct WorldContract {
    known_factions: Vec<String>,
}

impl ResponseContract for WorldContract {
    type Output = WorldReply;

    fn name(&self) -> &'static str {
        StageName::WorldSim.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"rumor": string | null, "faction_shifts": [{"faction": string, "delta": integer between -5 and 5}]}"#
    }

    fn validate(&self, output: WorldReply) -> Result<WorldReply, String> {
        for shift in &output.faction_shifts {
            if !self.known_factions.contains(&shift.faction) {
                return Err(format!("unknown faction {}", shift.faction));
            }
            if shift.delta.abs() > MAX_FACTION_SHIFT {
                return Err(format!("shift {} for {} is too large", shift.delta, shift.faction));
            }
        }
        if output
            .rumor
            .as_ref()
            .is_some_and(|r| r.chars().count() > MAX_RUMOR_CHARS)
        {
            return Err("rumor is too long".into());
        }
        Ok(output)
    }

    fn fallback(&self) -> WorldReply {
        WorldReply::default()
    }
}

/// Advances the world outside the player's view every few turns.
pub struct WorldSimStage;

#[async_trait]
impl Stage for WorldSimStage {
    fn name(&self) -> StageName {
        StageName::WorldSim
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let cadence = i64::from(ctx.config.world_sim_every);
        if turn.turn_number % cadence != 0 {
            debug!(turn_number = turn.turn_number, "world sim idle this turn");
            return Ok(());
        }

        let world = &turn.snapshot.campaign().world_state;
        let standings: Vec<(String, i64)> = world
            .get("factions")
            .and_then(Value::as_object)
            .map(|factions| {
                factions
                    .iter()
                    .map(|(name, v)| (name.clone(), v.as_i64().unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default();
        if standings.is_empty() {
            debug!("no factions to simulate");
            return Ok(());
        }
        let recent_rumors = world
            .get("rumors")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" | "))
            .unwrap_or_default();

        let prompt = Prompt::new(
            format!(
                "{} Decide what changed off-screen since the last tick. Small shifts only; \
                 often nothing happens.",
                preamble(ctx, turn)
            ),
            format!(
                "Faction standings: {}\nRecent rumors: {}\nPlayer's latest action: {}",
                standings
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                recent_rumors,
                turn.user_input
            ),
        );
        let contract = WorldContract {
            known_factions: standings.into_iter().map(|(name, _)| name).collect(),
        };
        let reply = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::WorldSim, &mut turn.warnings)
            .await
            .value;

        for shift in reply.faction_shifts.into_iter().filter(|s| s.delta != 0) {
            turn.world_notes
                .push(format!("{} standing shifts by {}", shift.faction, shift.delta));
            turn.pending_events
                .push(GameEvent::FactionStandingChanged(FactionStandingChanged {
                    faction: shift.faction,
                    delta: shift.delta,
                }));
        }
        if let Some(rumor) = reply.rumor.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty()) {
            turn.world_notes.push(format!("rumor: {rumor}"));
            turn.pending_events
                .push(GameEvent::RumorSpread(RumorSpread { text: rumor }));
        }
        Ok(())
    }
}
