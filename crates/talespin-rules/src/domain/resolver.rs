//! The mechanics resolver.
//!
//! `resolve` is a pure function of its inputs and the injected RNG:
//! (1) compute the difficulty class from the situation, (2) roll the check
//! die, (3) classify the outcome tier, (4) look up the time cost and the
//! consequences for the action type and tier.

use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;
use talespin_core::rng::DeterministicRng;
use talespin_world_state::domain::events::{
    CheckResolved, CombatHit, CombatMiss, CreditsChanged, DamageTaken, FlagSet, GameEvent,
    ItemConsumed, LocationChanged, RelationshipChanged,
};
use tracing::debug;

use super::actions::{ActionDescriptor, ActionType, Actor, Situation};
use super::tuning::{MechanicsTuning, TierTable};

/// Stat value used when the actor has no entry for the rolled stat.
const BASELINE_STAT: i32 = 10;

/// Outcome tier of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTier {
    /// Failed badly.
    CriticalFailure,
    /// Failed.
    Failure,
    /// Succeeded.
    Success,
    /// Succeeded spectacularly.
    CriticalSuccess,
}

impl OutcomeTier {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeTier::CriticalFailure => "critical_failure",
            OutcomeTier::Failure => "failure",
            OutcomeTier::Success => "success",
            OutcomeTier::CriticalSuccess => "critical_success",
        }
    }

    /// Whether the tier counts as a success.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, OutcomeTier::Success | OutcomeTier::CriticalSuccess)
    }

    fn pick<T: Copy>(self, table: &TierTable<T>) -> T {
        match self {
            OutcomeTier::CriticalFailure => table.critical_failure,
            OutcomeTier::Failure => table.failure,
            OutcomeTier::Success => table.success,
            OutcomeTier::CriticalSuccess => table.critical_success,
        }
    }
}

/// The dice record of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    /// Sides of the die.
    pub die_sides: u32,
    /// Face shown.
    pub natural_roll: u32,
    /// Stat modifier.
    pub modifier: i32,
    /// `natural_roll + modifier`.
    pub total: i32,
    /// Target number.
    pub difficulty_class: i32,
    /// Classified outcome.
    pub tier: OutcomeTier,
}

/// Everything the resolver produced for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicOutcome {
    /// Resolved action type.
    pub action_type: ActionType,
    /// Dice record.
    pub roll: DiceRoll,
    /// In-world minutes consumed.
    pub time_cost_minutes: u32,
    /// Resulting events, `check_resolved` first.
    pub events: Vec<GameEvent>,
}

/// Computes the difficulty class for an action in a situation.
#[must_use]
pub fn difficulty_class(
    action_type: ActionType,
    situation: &Situation,
    tuning: &MechanicsTuning,
) -> i32 {
    let failures = situation.prior_failures.min(tuning.prior_failure_cap);
    let dc = tuning.base_dc
        + tuning.action_adjustment(action_type)
        + tuning.danger_step * i32::from(situation.location_danger.min(5))
        + if situation.night {
            tuning.night_adjustment
        } else {
            0
        }
        + tuning.prior_failure_step * i32::try_from(failures).unwrap_or(i32::MAX);
    dc.clamp(tuning.min_dc, tuning.max_dc)
}

/// Ability modifier: half the distance from the baseline, rounded down.
#[must_use]
pub fn stat_modifier(stat: i32) -> i32 {
    (stat - BASELINE_STAT).div_euclid(2)
}

/// Classifies a roll. Natural extremes win over margins.
#[must_use]
pub fn classify(natural_roll: u32, total: i32, dc: i32, tuning: &MechanicsTuning) -> OutcomeTier {
    if natural_roll == tuning.critical_success_natural {
        return OutcomeTier::CriticalSuccess;
    }
    if natural_roll == tuning.critical_failure_natural {
        return OutcomeTier::CriticalFailure;
    }
    let margin = total - dc;
    if margin >= tuning.critical_success_margin {
        OutcomeTier::CriticalSuccess
    } else if margin >= 0 {
        OutcomeTier::Success
    } else if margin <= -tuning.critical_failure_margin {
        OutcomeTier::CriticalFailure
    } else {
        OutcomeTier::Failure
    }
}

/// In-world minutes an action takes at a tier. Never zero.
#[must_use]
pub fn time_cost(action_type: ActionType, tier: OutcomeTier, tuning: &MechanicsTuning) -> u32 {
    let percent = tier.pick(&tuning.tier_time_percent);
    let minutes = tuning
        .base_time(action_type)
        .saturating_mul(percent)
        .saturating_add(50)
        / 100;
    minutes.max(1)
}

fn validate(
    action: &ActionDescriptor,
    actor: &Actor,
    situation: &Situation,
) -> Result<(), DomainError> {
    let blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

    if action.action_type.requires_target() && blank(&action.target) {
        return Err(DomainError::InvalidAction(format!(
            "{} requires a target",
            action.action_type
        )));
    }
    if action.action_type == ActionType::Travel && blank(&action.destination) {
        return Err(DomainError::InvalidAction(
            "travel requires a destination".to_owned(),
        ));
    }
    if action.action_type == ActionType::UseItem {
        if blank(&action.item) {
            return Err(DomainError::InvalidAction(
                "use_item requires an item".to_owned(),
            ));
        }
        if !situation.actor_has_item {
            return Err(DomainError::InvalidAction(format!(
                "actor does not hold {}",
                action.item.as_deref().unwrap_or_default()
            )));
        }
    }
    if let Some(stat) = &action.stat {
        if !actor.stats.contains_key(stat) {
            return Err(DomainError::InvalidAction(format!("unknown stat {stat}")));
        }
    }
    if actor.hit_points <= 0 {
        return Err(DomainError::InvalidAction(
            "actor is incapacitated".to_owned(),
        ));
    }
    Ok(())
}

fn roll_die(rng: &mut dyn DeterministicRng, sides: u32) -> i32 {
    i32::try_from(rng.next_u32_range(1, sides.max(1))).unwrap_or(i32::MAX)
}

/// Resolves one mechanically relevant action.
///
/// Draw order from `rng`: the check die, then (only where the action's
/// consequences need one) a single consequence die.
///
/// # Errors
///
/// Returns `DomainError::InvalidAction` if the descriptor is malformed for
/// its action type, names an unknown stat, or the actor cannot act.
pub fn resolve(
    action: &ActionDescriptor,
    actor: &Actor,
    situation: &Situation,
    tuning: &MechanicsTuning,
    rng: &mut dyn DeterministicRng,
) -> Result<MechanicOutcome, DomainError> {
    validate(action, actor, situation)?;

    let action_type = action.action_type;
    let dc = difficulty_class(action_type, situation, tuning);
    let stat_name = action
        .stat
        .as_deref()
        .unwrap_or_else(|| action_type.default_stat());
    let modifier = stat_modifier(actor.stats.get(stat_name).copied().unwrap_or(BASELINE_STAT));
    let natural_roll = rng.next_u32_range(1, tuning.die_sides);
    let total = i32::try_from(natural_roll).unwrap_or(i32::MAX) + modifier;
    let tier = classify(natural_roll, total, dc, tuning);
    let time_cost_minutes = time_cost(action_type, tier, tuning);

    debug!(
        action = %action_type,
        natural_roll,
        modifier,
        dc,
        tier = tier.as_str(),
        "check resolved"
    );

    let roll = DiceRoll {
        die_sides: tuning.die_sides,
        natural_roll,
        modifier,
        total,
        difficulty_class: dc,
        tier,
    };

    let mut events = vec![GameEvent::CheckResolved(CheckResolved {
        actor_id: actor.character_id,
        action_type: action_type.as_str().to_owned(),
        die_sides: tuning.die_sides,
        natural_roll,
        modifier,
        total,
        difficulty_class: dc,
        outcome: tier.as_str().to_owned(),
        time_cost_minutes,
    })];
    events.extend(consequences(action, actor, situation, tier, tuning, rng));

    Ok(MechanicOutcome {
        action_type,
        roll,
        time_cost_minutes,
        events,
    })
}

fn consequences(
    action: &ActionDescriptor,
    actor: &Actor,
    situation: &Situation,
    tier: OutcomeTier,
    tuning: &MechanicsTuning,
    rng: &mut dyn DeterministicRng,
) -> Vec<GameEvent> {
    let target_name = action.target.clone().unwrap_or_default();
    let mishap = |rng: &mut dyn DeterministicRng, cause: &str| {
        GameEvent::DamageTaken(DamageTaken {
            character_id: actor.character_id,
            amount: roll_die(rng, tuning.hazard_die),
            cause: cause.to_owned(),
        })
    };

    match (action.action_type, tier) {
        (ActionType::Attack, OutcomeTier::Success | OutcomeTier::CriticalSuccess) => {
            let critical = tier == OutcomeTier::CriticalSuccess;
            let rolled = roll_die(rng, tuning.damage_die);
            vec![GameEvent::CombatHit(CombatHit {
                attacker_id: actor.character_id,
                target_id: situation.target_id,
                target_name,
                damage: if critical { rolled * 2 } else { rolled },
                critical,
            })]
        }
        (ActionType::Attack, OutcomeTier::Failure) => vec![GameEvent::CombatMiss(CombatMiss {
            attacker_id: actor.character_id,
            target_name,
        })],
        (ActionType::Attack, OutcomeTier::CriticalFailure) => vec![
            GameEvent::CombatMiss(CombatMiss {
                attacker_id: actor.character_id,
                target_name,
            }),
            mishap(rng, "counterattack"),
        ],
        (ActionType::Persuade | ActionType::Intimidate, _) => situation
            .target_id
            .map(|character_id| {
                GameEvent::RelationshipChanged(RelationshipChanged {
                    character_id,
                    delta: match action.action_type {
                        ActionType::Intimidate if tier.is_success() => {
                            -tier.pick(&tuning.social_relationship_delta).abs()
                        }
                        _ => tier.pick(&tuning.social_relationship_delta),
                    },
                    reason: format!("{} {}", action.action_type, tier.as_str()),
                })
            })
            .into_iter()
            .collect(),
        (ActionType::Investigate, OutcomeTier::Success | OutcomeTier::CriticalSuccess) => {
            vec![GameEvent::FlagSet(FlagSet {
                key: format!("clue:{}", slug(action.target.as_deref().unwrap_or(&action.intent))),
                value: serde_json::json!(tier.as_str()),
            })]
        }
        (ActionType::Travel, OutcomeTier::CriticalFailure) => vec![mishap(rng, "hazard on the road")],
        (ActionType::Travel, _) => vec![GameEvent::LocationChanged(LocationChanged {
            character_id: actor.character_id,
            location_id: action.destination.clone().unwrap_or_default(),
        })],
        (ActionType::UseItem, _) => vec![GameEvent::ItemConsumed(ItemConsumed {
            owner_id: actor.character_id,
            item_name: action.item.clone().unwrap_or_default(),
            quantity: 1,
        })],
        (ActionType::Steal, OutcomeTier::Success | OutcomeTier::CriticalSuccess) => {
            let rolled = roll_die(rng, tuning.credit_die);
            vec![GameEvent::CreditsChanged(CreditsChanged {
                character_id: actor.character_id,
                delta: i64::from(if tier == OutcomeTier::CriticalSuccess {
                    rolled * 2
                } else {
                    rolled
                }),
            })]
        }
        (ActionType::Steal, OutcomeTier::CriticalFailure) => situation
            .target_id
            .map(|character_id| {
                GameEvent::RelationshipChanged(RelationshipChanged {
                    character_id,
                    delta: tier.pick(&tuning.social_relationship_delta) * 2,
                    reason: "caught stealing".to_owned(),
                })
            })
            .into_iter()
            .collect(),
        (ActionType::Sneak, OutcomeTier::CriticalFailure) => vec![GameEvent::FlagSet(FlagSet {
            key: "alarm_raised".to_owned(),
            value: serde_json::json!(true),
        })],
        (ActionType::Athletics, OutcomeTier::CriticalFailure) => vec![mishap(rng, "a bad fall")],
        _ => Vec::new(),
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use talespin_test_support::{MockRng, SequenceRng};
    use uuid::Uuid;

    use super::*;

    fn actor(strength: i32) -> Actor {
        Actor {
            character_id: Uuid::new_v4(),
            stats: BTreeMap::from([("strength".to_owned(), strength)]),
            hit_points: 10,
        }
    }

    fn attack() -> ActionDescriptor {
        ActionDescriptor::new(ActionType::Attack, "attack the guard").with_target("guard")
    }

    #[test]
    fn test_attack_success_scenario() {
        // Arrange
        let actor = actor(14);
        let guard_id = Uuid::new_v4();
        let situation = Situation {
            target_id: Some(guard_id),
            ..Situation::default()
        };
        let mut rng = SequenceRng::new(vec![14, 4]);

        // Act
        let outcome = resolve(
            &attack(),
            &actor,
            &situation,
            &MechanicsTuning::default(),
            &mut rng,
        )
        .unwrap();

        // Assert
        assert_eq!(outcome.roll.natural_roll, 14);
        assert_eq!(outcome.roll.modifier, 2);
        assert_eq!(outcome.roll.difficulty_class, 12);
        assert_eq!(outcome.roll.tier, OutcomeTier::Success);
        assert_eq!(outcome.time_cost_minutes, 5);
        let hits: Vec<&CombatHit> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                GameEvent::CombatHit(hit) => Some(hit),
                _ => None,
            })
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].damage, 4);
        assert_eq!(hits[0].target_id, Some(guard_id));
        assert!(matches!(outcome.events[0], GameEvent::CheckResolved(_)));
    }

    #[test]
    fn test_difficulty_class_adds_situation_and_clamps() {
        let tuning = MechanicsTuning::default();
        let tense = Situation {
            location_danger: 3,
            night: true,
            prior_failures: 9,
            ..Situation::default()
        };
        let extreme = Situation {
            location_danger: 200,
            night: true,
            prior_failures: 100,
            ..Situation::default()
        };

        assert_eq!(difficulty_class(ActionType::Sneak, &tense, &tuning), 12 + 1 + 3 + 2 + 3);
        assert_eq!(difficulty_class(ActionType::UseItem, &Situation::default(), &tuning), 8);
        let capped = MechanicsTuning {
            max_dc: 18,
            ..MechanicsTuning::default()
        };
        assert_eq!(difficulty_class(ActionType::Steal, &extreme, &capped), 18);
    }

    #[test]
    fn test_natural_extremes_override_margin() {
        let tuning = MechanicsTuning::default();

        assert_eq!(classify(20, 10, 30, &tuning), OutcomeTier::CriticalSuccess);
        assert_eq!(classify(1, 40, 12, &tuning), OutcomeTier::CriticalFailure);
        assert_eq!(classify(15, 22, 12, &tuning), OutcomeTier::CriticalSuccess);
        assert_eq!(classify(5, 2, 12, &tuning), OutcomeTier::CriticalFailure);
        assert_eq!(classify(9, 11, 12, &tuning), OutcomeTier::Failure);
        assert_eq!(classify(12, 12, 12, &tuning), OutcomeTier::Success);
    }

    #[test]
    fn test_tier_boundaries_follow_tuning() {
        let tuning = MechanicsTuning {
            critical_success_margin: 3,
            critical_success_natural: 0,
            ..MechanicsTuning::default()
        };

        assert_eq!(classify(15, 15, 12, &tuning), OutcomeTier::CriticalSuccess);
        assert_eq!(classify(20, 14, 12, &tuning), OutcomeTier::Success);
    }

    #[test]
    fn test_time_cost_scales_by_tier_and_never_hits_zero() {
        let tuning = MechanicsTuning::default();

        assert_eq!(time_cost(ActionType::Travel, OutcomeTier::Failure, &tuning), 75);
        assert_eq!(time_cost(ActionType::Attack, OutcomeTier::CriticalSuccess, &tuning), 4);
        let instant = MechanicsTuning {
            base_time_minutes: BTreeMap::from([(ActionType::UseItem, 0)]),
            ..MechanicsTuning::default()
        };
        assert_eq!(time_cost(ActionType::UseItem, OutcomeTier::Success, &instant), 1);
    }

    #[test]
    fn test_time_cost_saturates_on_extreme_tuning() {
        let extreme = MechanicsTuning {
            base_time_minutes: BTreeMap::from([(ActionType::Travel, u32::MAX)]),
            tier_time_percent: TierTable {
                critical_failure: u32::MAX,
                failure: u32::MAX,
                success: u32::MAX,
                critical_success: u32::MAX,
            },
            ..MechanicsTuning::default()
        };

        let minutes = time_cost(ActionType::Travel, OutcomeTier::Failure, &extreme);

        assert_eq!(minutes, u32::MAX / 100);
    }

    #[test]
    fn test_stat_modifier_rounds_down() {
        assert_eq!(stat_modifier(10), 0);
        assert_eq!(stat_modifier(15), 2);
        assert_eq!(stat_modifier(9), -1);
        assert_eq!(stat_modifier(3), -4);
    }

    #[test]
    fn test_critical_attack_failure_hurts_the_attacker() {
        let actor = actor(10);
        let mut rng = SequenceRng::new(vec![1, 3]);

        let outcome = resolve(
            &attack(),
            &actor,
            &Situation::default(),
            &MechanicsTuning::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(outcome.roll.tier, OutcomeTier::CriticalFailure);
        assert_eq!(outcome.time_cost_minutes, 8);
        assert!(matches!(
            &outcome.events[2],
            GameEvent::DamageTaken(DamageTaken { amount: 3, character_id, .. })
                if *character_id == actor.character_id
        ));
    }

    #[test]
    fn test_attack_without_target_is_invalid() {
        let action = ActionDescriptor::new(ActionType::Attack, "swing wildly");

        let result = resolve(
            &action,
            &actor(12),
            &Situation::default(),
            &MechanicsTuning::default(),
            &mut MockRng,
        );

        match result {
            Err(DomainError::InvalidAction(msg)) => assert!(msg.contains("requires a target")),
            other => panic!("expected InvalidAction, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_stat_and_missing_item_are_invalid() {
        let tuning = MechanicsTuning::default();
        let mut with_stat = attack();
        with_stat.stat = Some("luck".to_owned());
        let mut use_item = ActionDescriptor::new(ActionType::UseItem, "drink the tonic");
        use_item.item = Some("tonic".to_owned());

        let unknown_stat = resolve(&with_stat, &actor(12), &Situation::default(), &tuning, &mut MockRng);
        let missing_item = resolve(&use_item, &actor(12), &Situation::default(), &tuning, &mut MockRng);

        assert!(matches!(unknown_stat, Err(DomainError::InvalidAction(_))));
        assert!(matches!(missing_item, Err(DomainError::InvalidAction(_))));
    }

    #[test]
    fn test_travel_moves_the_actor() {
        let actor = actor(10);
        let mut action = ActionDescriptor::new(ActionType::Travel, "walk to the docks");
        action.destination = Some("docks".to_owned());
        let mut rng = SequenceRng::new(vec![11]);

        let outcome = resolve(
            &action,
            &actor,
            &Situation::default(),
            &MechanicsTuning::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(outcome.roll.tier, OutcomeTier::Success);
        assert_eq!(outcome.time_cost_minutes, 60);
        assert!(matches!(
            &outcome.events[1],
            GameEvent::LocationChanged(LocationChanged { location_id, .. }) if location_id == "docks"
        ));
    }

    #[test]
    fn test_investigate_success_sets_a_clue_flag() {
        let mut rng = SequenceRng::new(vec![18]);
        let action = ActionDescriptor::new(ActionType::Investigate, "search the Old Desk!");

        let outcome = resolve(
            &action,
            &actor(10),
            &Situation::default(),
            &MechanicsTuning::default(),
            &mut rng,
        )
        .unwrap();

        assert!(matches!(
            &outcome.events[1],
            GameEvent::FlagSet(FlagSet { key, .. }) if key == "clue:search_the_old_desk"
        ));
    }

    #[test]
    fn test_same_rng_stream_reproduces_outcome() {
        use talespin_core::rng::{SeededRng, TurnSeed};

        let campaign_id = Uuid::new_v4();
        let seed = TurnSeed::new(campaign_id, 1, "mechanic.dice");
        let actor = actor(14);
        let tuning = MechanicsTuning::default();

        let first = resolve(
            &attack(),
            &actor,
            &Situation::default(),
            &tuning,
            &mut SeededRng::from_turn_seed(&seed),
        )
        .unwrap();
        let second = resolve(
            &attack(),
            &actor,
            &Situation::default(),
            &tuning,
            &mut SeededRng::from_turn_seed(&seed),
        )
        .unwrap();

        assert_eq!(first.roll, second.roll);
    }
}
