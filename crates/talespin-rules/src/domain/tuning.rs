//! Tuning constants for the resolver.
//!
//! Every number the resolver uses lives here so deployments can adjust them
//! from YAML without code changes. Missing fields take the defaults below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;

use super::actions::ActionType;

/// Per-tier values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable<T> {
    /// Critical failure.
    pub critical_failure: T,
    /// Failure.
    pub failure: T,
    /// Success.
    pub success: T,
    /// Critical success.
    pub critical_success: T,
}

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicsTuning {
    /// Sides of the check die.
    pub die_sides: u32,
    /// Difficulty class before adjustments.
    pub base_dc: i32,
    /// Lowest allowed difficulty class.
    pub min_dc: i32,
    /// Highest allowed difficulty class.
    pub max_dc: i32,
    /// Difficulty adjustment per action type.
    pub action_dc: BTreeMap<ActionType, i32>,
    /// Difficulty added per point of location danger.
    pub danger_step: i32,
    /// Difficulty added at night.
    pub night_adjustment: i32,
    /// Difficulty added per prior failure in the scene.
    pub prior_failure_step: i32,
    /// Prior failures counted at most.
    pub prior_failure_cap: u32,
    /// Natural roll that is always a critical success.
    pub critical_success_natural: u32,
    /// Natural roll that is always a critical failure.
    pub critical_failure_natural: u32,
    /// Margin over the DC that makes a success critical.
    pub critical_success_margin: i32,
    /// Margin under the DC that makes a failure critical.
    pub critical_failure_margin: i32,
    /// Base in-world minutes per action type.
    pub base_time_minutes: BTreeMap<ActionType, u32>,
    /// Base time used for action types missing from `base_time_minutes`.
    pub default_time_minutes: u32,
    /// Time multiplier per tier, in percent.
    pub tier_time_percent: TierTable<u32>,
    /// Sides of the weapon damage die.
    pub damage_die: u32,
    /// Sides of the die for mishaps (counterattacks, falls).
    pub hazard_die: u32,
    /// Sides of the die for stolen credits.
    pub credit_die: u32,
    /// Relationship change per tier for social actions.
    pub social_relationship_delta: TierTable<i32>,
}

impl Default for MechanicsTuning {
    fn default() -> Self {
        let action_dc = [
            (ActionType::Attack, 0),
            (ActionType::Sneak, 1),
            (ActionType::Persuade, 0),
            (ActionType::Intimidate, 1),
            (ActionType::Investigate, -1),
            (ActionType::Travel, -2),
            (ActionType::UseItem, -4),
            (ActionType::Steal, 2),
            (ActionType::Athletics, 0),
            (ActionType::Generic, 0),
        ]
        .into_iter()
        .collect();
        let base_time_minutes = [
            (ActionType::Attack, 5),
            (ActionType::Sneak, 10),
            (ActionType::Persuade, 10),
            (ActionType::Intimidate, 5),
            (ActionType::Investigate, 20),
            (ActionType::Travel, 60),
            (ActionType::UseItem, 2),
            (ActionType::Steal, 5),
            (ActionType::Athletics, 10),
            (ActionType::Generic, 10),
        ]
        .into_iter()
        .collect();

        Self {
            die_sides: 20,
            base_dc: 12,
            min_dc: 5,
            max_dc: 25,
            action_dc,
            danger_step: 1,
            night_adjustment: 2,
            prior_failure_step: 1,
            prior_failure_cap: 3,
            critical_success_natural: 20,
            critical_failure_natural: 1,
            critical_success_margin: 10,
            critical_failure_margin: 10,
            base_time_minutes,
            default_time_minutes: 10,
            tier_time_percent: TierTable {
                critical_failure: 150,
                failure: 125,
                success: 100,
                critical_success: 75,
            },
            damage_die: 6,
            hazard_die: 4,
            credit_die: 10,
            social_relationship_delta: TierTable {
                critical_failure: -5,
                failure: -2,
                success: 3,
                critical_success: 6,
            },
        }
    }
}

impl MechanicsTuning {
    /// Parses tuning from YAML. Absent fields keep their defaults; the
    /// per-action maps are merged key by key into the default maps.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for malformed YAML or inconsistent
    /// values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DomainError> {
        let mut tuning: Self = serde_yaml::from_str(yaml)
            .map_err(|e| DomainError::Validation(format!("invalid mechanics tuning: {e}")))?;
        let defaults = Self::default();
        for (action_type, adjustment) in defaults.action_dc {
            tuning.action_dc.entry(action_type).or_insert(adjustment);
        }
        for (action_type, minutes) in defaults.base_time_minutes {
            tuning.base_time_minutes.entry(action_type).or_insert(minutes);
        }
        tuning.validate()?;
        Ok(tuning)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.die_sides < 2 {
            return Err(DomainError::Validation(
                "die_sides must be at least 2".to_owned(),
            ));
        }
        if self.min_dc > self.max_dc {
            return Err(DomainError::Validation(
                "min_dc must not exceed max_dc".to_owned(),
            ));
        }
        if self.critical_success_margin <= 0 || self.critical_failure_margin <= 0 {
            return Err(DomainError::Validation(
                "critical margins must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Difficulty adjustment for an action type.
    #[must_use]
    pub fn action_adjustment(&self, action_type: ActionType) -> i32 {
        self.action_dc.get(&action_type).copied().unwrap_or(0)
    }

    /// Base time for an action type.
    #[must_use]
    pub fn base_time(&self, action_type: ActionType) -> u32 {
        self.base_time_minutes
            .get(&action_type)
            .copied()
            .unwrap_or(self.default_time_minutes)
    }
}
