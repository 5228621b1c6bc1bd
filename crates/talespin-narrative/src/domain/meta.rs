//! Out-of-character commands, answered from the projection alone.

use serde::{Deserialize, Serialize};
use talespin_world_state::application::query_handlers::StateSnapshot;
use talespin_world_state::domain::events::QuestStatus;

/// A parsed meta command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum MetaCommandKind {
    /// `/help`
    Help,
    /// `/status`
    Status,
    /// `/inventory`
    Inventory,
    /// `/quests`
    Quests,
    /// `/time`
    Time,
    /// `ooc: ...` remark to the table.
    OutOfCharacter(String),
    /// A slash command nobody recognises.
    Unknown(String),
}

impl MetaCommandKind {
    /// Normalized command name, as recorded in the log.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Help => "help",
            Self::Status => "status",
            Self::Inventory => "inventory",
            Self::Quests => "quests",
            Self::Time => "time",
            Self::OutOfCharacter(_) => "ooc",
            Self::Unknown(name) => name,
        }
    }
}

const OOC_PREFIX: &str = "ooc:";

/// Parses `input` as a meta command. Returns `None` for in-character input.
#[must_use]
pub fn parse(input: &str) -> Option<MetaCommandKind> {
    let trimmed = input.trim();
    if trimmed
        .get(..OOC_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(OOC_PREFIX))
    {
        return Some(MetaCommandKind::OutOfCharacter(
            trimmed[OOC_PREFIX.len()..].trim().to_owned(),
        ));
    }
    let command = trimmed.strip_prefix('/')?;
    let name = command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    Some(match name.as_str() {
        "help" | "?" => MetaCommandKind::Help,
        "status" | "sheet" => MetaCommandKind::Status,
        "inventory" | "inv" | "i" => MetaCommandKind::Inventory,
        "quests" | "journal" => MetaCommandKind::Quests,
        "time" => MetaCommandKind::Time,
        _ => MetaCommandKind::Unknown(name),
    })
}

/// Formats in-world minutes since the campaign start as a clock reading.
#[must_use]
pub fn clock_reading(world_minutes: i64, start_hour: u32) -> String {
    let total = world_minutes + i64::from(start_hour) * 60;
    let day = total.div_euclid(24 * 60) + 1;
    let minute_of_day = total.rem_euclid(24 * 60);
    format!(
        "Day {day}, {:02}:{:02}",
        minute_of_day / 60,
        minute_of_day % 60
    )
}

/// Answers a meta command.
#[must_use]
pub fn answer(command: &MetaCommandKind, snapshot: &StateSnapshot, start_hour: u32) -> String {
    match command {
        MetaCommandKind::Help => "Commands: /status, /inventory, /quests, /time, /help. \
             Prefix a remark with ooc: to speak out of character. \
             Anything else is your character's action or speech."
            .to_owned(),
        MetaCommandKind::Status => {
            let player = snapshot.player();
            let stats = player
                .stats
                .iter()
                .map(|(name, value)| format!("{name} {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{}: {}/{} HP, {} credits, mood {}, stress {}. Stats: {}. Location: {}.",
                player.name,
                player.hit_points,
                player.max_hit_points,
                player.credits,
                player.psych.mood,
                player.psych.stress,
                if stats.is_empty() { "none" } else { &stats },
                player.location_id.as_deref().unwrap_or("unknown"),
            )
        }
        MetaCommandKind::Inventory => {
            let items = snapshot.player_inventory();
            if items.is_empty() {
                "You are carrying nothing.".to_owned()
            } else {
                let listed = items
                    .iter()
                    .map(|item| format!("{} x{}", item.item_name, item.quantity))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("You are carrying: {listed}.")
            }
        }
        MetaCommandKind::Quests => {
            let open: Vec<String> = snapshot
                .projection
                .quests
                .values()
                .filter(|q| matches!(q.status, QuestStatus::Active | QuestStatus::Available))
                .map(|q| match &q.stage {
                    Some(stage) => format!("{} ({stage})", q.title),
                    None => q.title.clone(),
                })
                .collect();
            if open.is_empty() {
                "No open quests.".to_owned()
            } else {
                format!("Open quests: {}.", open.join("; "))
            }
        }
        MetaCommandKind::Time => {
            format!(
                "It is {}.",
                clock_reading(snapshot.campaign().world_time_minutes, start_hour)
            )
        }
        MetaCommandKind::OutOfCharacter(_) => "Noted.".to_owned(),
        MetaCommandKind::Unknown(name) => {
            format!("Unknown command /{name}. Type /help for the list.")
        }
    }
}
