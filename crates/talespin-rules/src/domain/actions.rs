//! Resolver inputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mechanically relevant action categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Strike a target.
    Attack,
    /// Move unseen.
    Sneak,
    /// Convince someone.
    Persuade,
    /// Threaten someone.
    Intimidate,
    /// Search or study.
    Investigate,
    /// Go somewhere.
    Travel,
    /// Use an inventory item.
    UseItem,
    /// Take something that is not yours.
    Steal,
    /// Climb, jump, swim, force.
    Athletics,
    /// Anything else that still warrants a roll.
    Generic,
}

impl ActionType {
    /// Every action type.
    pub const ALL: [ActionType; 10] = [
        ActionType::Attack,
        ActionType::Sneak,
        ActionType::Persuade,
        ActionType::Intimidate,
        ActionType::Investigate,
        ActionType::Travel,
        ActionType::UseItem,
        ActionType::Steal,
        ActionType::Athletics,
        ActionType::Generic,
    ];

    /// Stable label, identical to the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Attack => "attack",
            ActionType::Sneak => "sneak",
            ActionType::Persuade => "persuade",
            ActionType::Intimidate => "intimidate",
            ActionType::Investigate => "investigate",
            ActionType::Travel => "travel",
            ActionType::UseItem => "use_item",
            ActionType::Steal => "steal",
            ActionType::Athletics => "athletics",
            ActionType::Generic => "generic",
        }
    }

    /// Parses a label produced by [`ActionType::as_str`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == label.trim().to_ascii_lowercase())
    }

    /// The stat rolled when the action names none.
    #[must_use]
    pub fn default_stat(self) -> &'static str {
        match self {
            ActionType::Attack | ActionType::Athletics => "strength",
            ActionType::Sneak | ActionType::Steal | ActionType::UseItem => "dexterity",
            ActionType::Persuade | ActionType::Intimidate => "charisma",
            ActionType::Investigate => "intelligence",
            ActionType::Travel | ActionType::Generic => "wits",
        }
    }

    /// Whether the action is meaningless without a target.
    #[must_use]
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            ActionType::Attack | ActionType::Persuade | ActionType::Intimidate | ActionType::Steal
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified player action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Category.
    pub action_type: ActionType,
    /// Target as named by the player.
    pub target: Option<String>,
    /// Declared intent, in the player's words.
    pub intent: String,
    /// Stat to roll; [`ActionType::default_stat`] when absent.
    pub stat: Option<String>,
    /// Item used, for `UseItem`.
    pub item: Option<String>,
    /// Destination location id, for `Travel`.
    pub destination: Option<String>,
}

impl ActionDescriptor {
    /// A descriptor with only a type and intent.
    pub fn new(action_type: ActionType, intent: impl Into<String>) -> Self {
        Self {
            action_type,
            target: None,
            intent: intent.into(),
            stat: None,
            item: None,
            destination: None,
        }
    }

    /// Sets the target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// The acting character, as far as the resolver cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Character identifier.
    pub character_id: Uuid,
    /// Stats by name.
    pub stats: BTreeMap<String, i32>,
    /// Current hit points.
    pub hit_points: i32,
}

/// Situational modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Situation {
    /// Danger rating of the current location, 0 (safe) to 5.
    pub location_danger: u8,
    /// Whether it is night in the world clock.
    pub night: bool,
    /// Failed checks earlier in the scene.
    pub prior_failures: u32,
    /// The target's character id, when the target is a tracked character.
    pub target_id: Option<Uuid>,
    /// Whether the actor holds the item named by a `UseItem` action.
    pub actor_has_item: bool,
}
