//! Mechanic: resolves the routed action with dice. Never calls a model.

use async_trait::async_trait;
use serde_json::{Value, json};
use talespin_core::error::DomainError;
use talespin_rules::{Actor, Situation, resolve};
use talespin_world_state::domain::events::{FlagSet, GameEvent};
use tracing::debug;

use super::{Stage, StageContext};
use crate::domain::turn_state::{StageName, TurnState};

/// Flag counting consecutive failed checks.
pub const FAILURE_STREAK_FLAG: &str = "failure_streak";

/// Random stream used for the check and its consequences.
pub const DICE_STREAM: &str = "mechanic.dice";

fn failure_streak(turn: &TurnState) -> u32 {
    turn.snapshot
        .campaign()
        .world_state
        .get("flags")
        .and_then(|flags| flags.get(FAILURE_STREAK_FLAG))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Resolves the action chosen by the router.
pub struct MechanicStage;

#[async_trait]
impl Stage for MechanicStage {
    fn name(&self) -> StageName {
        StageName::Mechanic
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let Some(action) = turn.route.as_ref().and_then(|r| r.action.clone()) else {
            return Err(DomainError::InvalidAction(
                "mechanic stage reached without an action descriptor".into(),
            ));
        };

        let danger = turn.resolve_location(ctx.content.as_ref(), self.name()).danger;
        let player = turn.snapshot.player();
        let target_id = action.target.as_deref().and_then(|target| {
            let needle = target.to_lowercase();
            player.location_id.as_deref().and_then(|location| {
                turn.snapshot
                    .projection
                    .characters_at(location, player.character_id)
                    .into_iter()
                    .find(|c| c.name.to_lowercase() == needle)
                    .map(|c| c.character_id)
            })
        });
        let actor = Actor {
            character_id: player.character_id,
            stats: player.stats.clone(),
            hit_points: player.hit_points,
        };
        let streak = failure_streak(turn);
        let situation = Situation {
            location_danger: danger,
            night: turn.is_night(ctx.config.campaign_start_hour),
            prior_failures: streak,
            target_id,
            actor_has_item: action.item.as_deref().is_some_and(|wanted| {
                turn.snapshot
                    .player_inventory()
                    .iter()
                    .any(|item| item.item_name.eq_ignore_ascii_case(wanted))
            }),
        };

        let mut rng = ctx.rng.stream(&turn.seed(DICE_STREAM));
        let outcome = resolve(&action, &actor, &situation, &ctx.tuning, rng.as_mut())?;
        debug!(
            turn_number = turn.turn_number,
            natural_roll = outcome.roll.natural_roll,
            dc = outcome.roll.difficulty_class,
            tier = outcome.roll.tier.as_str(),
            "mechanics resolved"
        );

        let next_streak = if outcome.roll.tier.is_success() {
            0
        } else {
            streak + 1
        };
        turn.pending_events.extend(outcome.events.iter().cloned());
        if next_streak != streak {
            turn.pending_events.push(GameEvent::FlagSet(FlagSet {
                key: FAILURE_STREAK_FLAG.to_owned(),
                value: json!(next_streak),
            }));
        }
        turn.time_cost_minutes = outcome.time_cost_minutes;
        turn.mechanic = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use talespin_rules::{ActionDescriptor, ActionType, OutcomeTier};
    use talespin_test_support::{ScriptedRngSource, UnreachableLlm};
    use talespin_world_state::domain::events::CharacterRole;

    use super::*;
    use crate::domain::route::RouteDecision;
    use crate::stages::testing;

    #[tokio::test]
    async fn test_attack_scenario_resolves_against_seeded_dice() {
        // Arrange
        let llm = Arc::new(UnreachableLlm::new());
        let mut ctx = testing::context(llm.clone());
        ctx.rng = Arc::new(ScriptedRngSource::new().with_stream(DICE_STREAM, vec![14, 4]));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let guard = testing::seed("Guard", CharacterRole::Npc, "docks");
        let guard_id = guard.character_id;
        let mut turn = testing::turn(&[player, guard], "attack the guard");
        turn.route = Some(RouteDecision::action(
            ActionDescriptor::new(ActionType::Attack, "attack the guard").with_target("guard"),
            "test",
        ));

        // Act
        MechanicStage.run(&ctx, &mut turn).await.unwrap();

        // Assert
        let outcome = turn.mechanic.as_ref().unwrap();
        assert_eq!(outcome.roll.natural_roll, 14);
        assert_eq!(outcome.roll.modifier, 2);
        assert_eq!(outcome.roll.difficulty_class, 12);
        assert_eq!(outcome.roll.tier, OutcomeTier::Success);
        assert_eq!(turn.time_cost_minutes, 5);
        let hits: Vec<_> = turn
            .pending_events
            .iter()
            .filter_map(|e| match e {
                GameEvent::CombatHit(hit) => Some(hit),
                _ => None,
            })
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target_id, Some(guard_id));
        assert_eq!(hits[0].damage, 4);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_extends_the_streak() {
        let mut ctx = testing::context(Arc::new(UnreachableLlm::new()));
        ctx.rng = Arc::new(ScriptedRngSource::new().with_stream(DICE_STREAM, vec![3]));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "sneak past");
        turn.route = Some(RouteDecision::action(
            ActionDescriptor::new(ActionType::Sneak, "sneak past"),
            "test",
        ));

        MechanicStage.run(&ctx, &mut turn).await.unwrap();

        assert!(turn.pending_events.iter().any(|e| matches!(
            e,
            GameEvent::FlagSet(flag) if flag.key == FAILURE_STREAK_FLAG && flag.value == json!(1)
        )));
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_fatal() {
        let ctx = testing::context(Arc::new(UnreachableLlm::new()));
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "hello");

        let result = MechanicStage.run(&ctx, &mut turn).await;

        assert!(matches!(result, Err(DomainError::InvalidAction(_))));
    }
}
