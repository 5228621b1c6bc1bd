//! Encounter: who is on stage, and whether someone new shows up.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_core::rng::DeterministicRng;
use talespin_core::warnings::WarningCode;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_world_state::domain::events::{
    CharacterRole, CharacterSeed, GameEvent, NpcSpawned, PsychProfile,
};
use tracing::debug;
use uuid::{Builder, Uuid};

use super::{Stage, StageContext, preamble};
use crate::domain::turn_state::{ActiveNpc, StageName, TurnState};

/// Random stream for spawn checks.
pub const SPAWN_STREAM: &str = "encounter.spawn";

/// Random stream for the ids of spawned characters.
pub const SPAWN_ID_STREAM: &str = "encounter.spawn_id";

/// A v4 id drawn from the turn's seeded stream, so replays spawn the same id.
fn seeded_id(rng: &mut dyn DeterministicRng) -> Uuid {
    let mut bytes = [0_u8; 16];
    for chunk in bytes.chunks_exact_mut(4) {
        chunk.copy_from_slice(&rng.next_u32_range(0, u32::MAX).to_le_bytes());
    }
    Builder::from_random_bytes(bytes).into_uuid()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncounterReply {
    pub introduction: String,
}

struct EncounterContract {
    name: String,
}

impl ResponseContract for EncounterContract {
    type Output = EncounterReply;

    fn name(&self) -> &'static str {
        StageName::Encounter.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"introduction": "one sentence introducing the arrival"}"#
    }

    fn validate(&self, output: EncounterReply) -> Result<EncounterReply, String> {
        if output.introduction.trim().is_empty() {
            Err("introduction is empty".into())
        } else {
            Ok(output)
        }
    }

    fn fallback(&self) -> EncounterReply {
        EncounterReply {
            introduction: format!("{} steps into view.", self.name),
        }
    }
}

/// Populates the scene and rolls for arrivals.
pub struct EncounterStage;

#[async_trait]
impl Stage for EncounterStage {
    fn name(&self) -> StageName {
        StageName::Encounter
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let location = turn
            .resolve_location(ctx.content.as_ref(), self.name())
            .clone();
        turn.active_npcs = turn
            .snapshot
            .npcs_near_player()
            .into_iter()
            .map(|npc| ActiveNpc {
                character_id: npc.character_id,
                name: npc.name.clone(),
                description: String::new(),
                newly_arrived: false,
            })
            .collect();

        let total_weight: u32 = location.spawn_table.iter().map(|e| e.weight).sum();
        if location.encounter_chance == 0 || total_weight == 0 {
            return Ok(());
        }
        let mut rng = ctx.rng.stream(&turn.seed(SPAWN_STREAM));
        let roll = rng.next_u32_range(1, 100);
        if roll > u32::from(location.encounter_chance) {
            debug!(roll, chance = location.encounter_chance, "no encounter");
            return Ok(());
        }
        let mut pick = rng.next_u32_range(1, total_weight);
        let Some(entry) = location.spawn_table.iter().find(|entry| {
            if pick <= entry.weight {
                true
            } else {
                pick -= entry.weight;
                false
            }
        }) else {
            return Ok(());
        };

        let Some(def) = ctx.content.npc(&entry.npc_id) else {
            turn.warnings.push(
                self.name().as_str(),
                WarningCode::ContentMissing,
                format!("no era-pack entry for npc {}", entry.npc_id),
            );
            return Ok(());
        };
        if turn
            .active_npcs
            .iter()
            .any(|npc| npc.name.eq_ignore_ascii_case(&def.name))
        {
            debug!(npc = %def.name, "spawned npc already present");
            return Ok(());
        }

        let mut id_rng = ctx.rng.stream(&turn.seed(SPAWN_ID_STREAM));
        let character = CharacterSeed {
            character_id: seeded_id(id_rng.as_mut()),
            name: def.name.clone(),
            role: CharacterRole::Npc,
            location_id: location.id.clone(),
            stats: def.stats.clone(),
            hit_points: def.hit_points,
            max_hit_points: def.hit_points,
            relationship: 0,
            secret_agenda: def.secret_agenda.clone(),
            credits: 0,
            psych: PsychProfile::default(),
        };

        let prompt = Prompt::new(
            format!("{} Introduce a character arriving in the scene.", preamble(ctx, turn)),
            format!(
                "Location: {}. Arriving: {} ({}). Player just did: {}",
                location.name, def.name, def.description, turn.user_input
            ),
        );
        let contract = EncounterContract {
            name: def.name.clone(),
        };
        let introduction = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::Encounter, &mut turn.warnings)
            .await
            .value
            .introduction;

        debug!(npc = %def.name, location = %location.name, "npc spawned");
        turn.active_npcs.push(ActiveNpc {
            character_id: character.character_id,
            name: def.name.clone(),
            description: def.description.clone(),
            newly_arrived: true,
        });
        turn.encounter_note = Some(introduction);
        turn.pending_events.push(GameEvent::NpcSpawned(NpcSpawned {
            character,
            reason: format!("encounter at {}", location.name),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use talespin_content::EraPack;
    use talespin_test_support::{ScriptedRngSource, UnreachableLlm};

    use super::*;
    use crate::stages::testing;

    const PACK: &str = r"
id: gaslight
name: Gaslight
locations:
  - id: docks
    name: The Docks
    encounter_chance: 50
    spawn_table:
      - npc_id: smuggler
        weight: 1
npcs:
  - id: smuggler
    name: Quill
    secret_agenda: sells to both sides
";

    fn pack() -> Arc<EraPack> {
        Arc::new(EraPack::from_yaml_str(PACK).unwrap())
    }

    #[tokio::test]
    async fn test_successful_roll_spawns_from_table() {
        // Arrange
        let llm = Arc::new(UnreachableLlm::new());
        let mut ctx = testing::context(llm);
        ctx.content = pack();
        ctx.rng = Arc::new(ScriptedRngSource::new().with_stream(SPAWN_STREAM, vec![20, 1]));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        // Act
        EncounterStage.run(&ctx, &mut turn).await.unwrap();

        // Assert
        assert_eq!(turn.active_npcs.len(), 1);
        assert!(turn.active_npcs[0].newly_arrived);
        assert_eq!(turn.encounter_note.as_deref(), Some("Quill steps into view."));
        match &turn.pending_events[..] {
            [GameEvent::NpcSpawned(spawned)] => {
                assert_eq!(spawned.character.name, "Quill");
                assert_eq!(spawned.character.location_id.as_deref(), Some("docks"));
            }
            other => panic!("expected one spawn, got {other:?}"),
        }
        assert_eq!(turn.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_spawns_the_same_character_id() {
        let mut ctx = testing::context(Arc::new(UnreachableLlm::new()));
        ctx.content = pack();
        ctx.rng = Arc::new(ScriptedRngSource::new().with_stream(SPAWN_STREAM, vec![20, 1]));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let turn = testing::turn(&[player], "wait");
        let (mut first, mut second) = (turn.clone(), turn);

        EncounterStage.run(&ctx, &mut first).await.unwrap();
        EncounterStage.run(&ctx, &mut second).await.unwrap();

        assert_eq!(first.pending_events, second.pending_events);
        assert_eq!(first.active_npcs[0].character_id, second.active_npcs[0].character_id);
        assert_eq!(first.active_npcs[0].character_id.get_version_num(), 4);
    }

    #[tokio::test]
    async fn test_failed_roll_spawns_nothing() {
        let mut ctx = testing::context(Arc::new(UnreachableLlm::new()));
        ctx.content = pack();
        ctx.rng = Arc::new(ScriptedRngSource::new().with_stream(SPAWN_STREAM, vec![51]));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "wait");

        EncounterStage.run(&ctx, &mut turn).await.unwrap();

        assert!(turn.pending_events.is_empty());
        assert!(turn.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_location_warns_and_continues() {
        let ctx = testing::context(Arc::new(UnreachableLlm::new()));
        let guard = testing::seed("Guard", CharacterRole::Npc, "nowhere");
        let player = testing::seed("Ada", CharacterRole::Player, "nowhere");
        let mut turn = testing::turn(&[player, guard], "wait");

        EncounterStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.active_npcs.len(), 1);
        assert_eq!(turn.warnings.count_of(WarningCode::ContentMissing), 1);
        assert_eq!(turn.location.unwrap().name, "nowhere");
    }
}
