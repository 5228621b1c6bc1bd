//! Route classification.
//!
//! The keyword classifier is deterministic and always available; the router
//! stage may ask a model to refine it, and uses it as the fallback when the
//! model is unusable. [`sanitize`] makes sure whatever comes out is a
//! descriptor the mechanics resolver accepts.

use serde::{Deserialize, Serialize};
use talespin_rules::{ActionDescriptor, ActionType};
use talespin_world_state::application::query_handlers::StateSnapshot;

use super::meta::{self, MetaCommandKind};

/// Which stages a turn runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Out-of-character command: straight to commit.
    Meta,
    /// Conversation: everything but the mechanics resolver.
    Talk,
    /// Mechanically relevant action: every stage.
    Action,
}

impl RouteClass {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Meta => "meta",
            RouteClass::Talk => "talk",
            RouteClass::Action => "action",
        }
    }
}

/// The router's verdict for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Route class.
    pub class: RouteClass,
    /// Present exactly when `class` is `Action`.
    pub action: Option<ActionDescriptor>,
    /// Present exactly when `class` is `Meta`.
    pub meta: Option<MetaCommandKind>,
    /// Short human-readable reason.
    pub rationale: String,
    /// Whether a model refined the keyword classification.
    pub refined: bool,
}

impl RouteDecision {
    /// A conversation route.
    #[must_use]
    pub fn talk(rationale: impl Into<String>) -> Self {
        Self {
            class: RouteClass::Talk,
            action: None,
            meta: None,
            rationale: rationale.into(),
            refined: false,
        }
    }

    /// An action route.
    #[must_use]
    pub fn action(action: ActionDescriptor, rationale: impl Into<String>) -> Self {
        Self {
            class: RouteClass::Action,
            action: Some(action),
            meta: None,
            rationale: rationale.into(),
            refined: false,
        }
    }

    /// The action type label, if any.
    #[must_use]
    pub fn action_label(&self) -> Option<String> {
        self.action.as_ref().map(|a| a.action_type.as_str().to_owned())
    }
}

const VERBS: &[(&str, ActionType)] = &[
    ("attack", ActionType::Attack),
    ("hit", ActionType::Attack),
    ("stab", ActionType::Attack),
    ("shoot", ActionType::Attack),
    ("punch", ActionType::Attack),
    ("fight", ActionType::Attack),
    ("strike", ActionType::Attack),
    ("sneak", ActionType::Sneak),
    ("hide", ActionType::Sneak),
    ("creep", ActionType::Sneak),
    ("persuade", ActionType::Persuade),
    ("convince", ActionType::Persuade),
    ("bargain", ActionType::Persuade),
    ("haggle", ActionType::Persuade),
    ("threaten", ActionType::Intimidate),
    ("intimidate", ActionType::Intimidate),
    ("search", ActionType::Investigate),
    ("investigate", ActionType::Investigate),
    ("examine", ActionType::Investigate),
    ("inspect", ActionType::Investigate),
    ("look", ActionType::Investigate),
    ("travel", ActionType::Travel),
    ("go", ActionType::Travel),
    ("walk", ActionType::Travel),
    ("head", ActionType::Travel),
    ("use", ActionType::UseItem),
    ("drink", ActionType::UseItem),
    ("eat", ActionType::UseItem),
    ("steal", ActionType::Steal),
    ("pickpocket", ActionType::Steal),
    ("climb", ActionType::Athletics),
    ("jump", ActionType::Athletics),
    ("swim", ActionType::Athletics),
    ("run", ActionType::Athletics),
];

const TALK_CUES: &[&str] = &[
    "say", "ask", "tell", "talk", "speak", "greet", "reply", "whisper", "shout", "chat",
];

const SUBJECTS: &[&str] = &["i", "we", "you", "carefully", "quickly", "quietly", "try", "to"];
const ARTICLES: &[&str] = &["the", "a", "an", "my", "his", "her", "their", "some", "to", "at", "toward", "towards", "into", "around"];
const STOPS: &[&str] = &["with", "using", "to", "into", "about", "for", "and", "then", "while", "so"];

fn words(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn object_phrase(rest: &[String]) -> Option<String> {
    let start = rest
        .iter()
        .position(|w| !ARTICLES.contains(&w.as_str()))?;
    let phrase: Vec<&str> = rest[start..]
        .iter()
        .take_while(|w| !STOPS.contains(&w.as_str()))
        .map(String::as_str)
        .collect();
    (!phrase.is_empty()).then(|| phrase.join(" "))
}

/// Classifies `input` by keywords alone.
#[must_use]
pub fn classify(input: &str) -> RouteDecision {
    if let Some(command) = meta::parse(input) {
        return RouteDecision {
            class: RouteClass::Meta,
            action: None,
            meta: Some(command),
            rationale: "meta command".to_owned(),
            refined: false,
        };
    }
    let trimmed = input.trim();
    if trimmed.starts_with(['"', '\u{201c}', '\'']) {
        return RouteDecision::talk("quoted speech");
    }

    let words = words(trimmed);
    let lead = words
        .iter()
        .position(|w| !SUBJECTS.contains(&w.as_str()))
        .unwrap_or(words.len());
    for (index, word) in words.iter().enumerate().skip(lead) {
        if TALK_CUES.contains(&word.as_str()) {
            return RouteDecision::talk(format!("talk cue '{word}'"));
        }
        if let Some((_, action_type)) = VERBS.iter().find(|(verb, _)| verb == word) {
            let rest = &words[index + 1..];
            return RouteDecision::action(
                describe(*action_type, trimmed, rest),
                format!("action verb '{word}'"),
            );
        }
    }
    RouteDecision::talk("no action verb")
}

fn describe(action_type: ActionType, intent: &str, rest: &[String]) -> ActionDescriptor {
    let object = object_phrase(rest);
    let mut action = ActionDescriptor::new(action_type, intent);
    match action_type {
        ActionType::Travel => action.destination = object.map(|o| o.replace(' ', "_")),
        ActionType::UseItem => action.item = object,
        _ => action.target = object,
    }
    action
}

/// Downgrades descriptors the resolver would reject to a generic action, and
/// normalises item names to the player's inventory.
///
/// A player at 0 HP cannot act: their actions become talk turns.
#[must_use]
pub fn sanitize(mut decision: RouteDecision, snapshot: &StateSnapshot) -> RouteDecision {
    if decision.class == RouteClass::Action && decision.action.is_none() {
        return RouteDecision::talk("action route without descriptor");
    }
    if decision.class == RouteClass::Action && snapshot.player().hit_points <= 0 {
        return RouteDecision::talk("player is incapacitated");
    }
    let Some(action) = decision.action.as_mut() else {
        return decision;
    };
    let blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

    let downgrade = match action.action_type {
        t if t.requires_target() && blank(&action.target) => Some("no target"),
        ActionType::Travel if blank(&action.destination) => Some("no destination"),
        ActionType::UseItem => {
            let wanted = action.item.as_deref().unwrap_or_default().to_lowercase();
            let held = snapshot.player_inventory().into_iter().find(|item| {
                let name = item.item_name.to_lowercase();
                !wanted.is_empty() && (name == wanted || name.contains(&wanted))
            });
            match held {
                Some(item) => {
                    action.item = Some(item.item_name.clone());
                    None
                }
                None => Some("item not held"),
            }
        }
        _ => None,
    };
    if let Some(stat) = &action.stat {
        if !snapshot.player().stats.contains_key(stat) {
            action.stat = None;
        }
    }
    if let Some(reason) = downgrade {
        let intent = std::mem::take(&mut action.intent);
        decision.action = Some(ActionDescriptor::new(ActionType::Generic, intent));
        decision.rationale = format!("{}; downgraded to generic ({reason})", decision.rationale);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attack_with_target() {
        let decision = classify("attack the guard");

        assert_eq!(decision.class, RouteClass::Action);
        let action = decision.action.unwrap();
        assert_eq!(action.action_type, ActionType::Attack);
        assert_eq!(action.target.as_deref(), Some("guard"));
        assert_eq!(action.intent, "attack the guard");
    }

    #[test]
    fn test_subject_and_instrument_are_skipped() {
        let action = classify("I quickly stab the old smuggler with my knife")
            .action
            .unwrap();

        assert_eq!(action.action_type, ActionType::Attack);
        assert_eq!(action.target.as_deref(), Some("old smuggler"));
    }

    #[test]
    fn test_travel_destination_becomes_location_id() {
        let action = classify("go to the night market").action.unwrap();

        assert_eq!(action.action_type, ActionType::Travel);
        assert_eq!(action.destination.as_deref(), Some("night_market"));
    }

    #[test]
    fn test_speech_is_talk() {
        assert_eq!(classify("ask Mira about the ship").class, RouteClass::Talk);
        assert_eq!(classify("\"Nice weather.\"").class, RouteClass::Talk);
        assert_eq!(classify("hmm").class, RouteClass::Talk);
    }

    #[test]
    fn test_meta_is_recognised_first() {
        let decision = classify("/inventory");

        assert_eq!(decision.class, RouteClass::Meta);
        assert_eq!(decision.meta, Some(MetaCommandKind::Inventory));
        assert!(decision.action.is_none());
    }
}
