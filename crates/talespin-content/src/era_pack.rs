//! Era packs: YAML-authored content for one time period.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;
use tracing::info;

/// A weighted entry of a location's spawn table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnEntry {
    /// NPC definition id.
    pub npc_id: String,
    /// Relative weight.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// A place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDef {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Prose description.
    #[serde(default)]
    pub description: String,
    /// Danger rating, 0 (safe) to 5.
    #[serde(default)]
    pub danger: u8,
    /// Chance per action turn that someone shows up, in percent.
    #[serde(default)]
    pub encounter_chance: u8,
    /// Reachable location ids.
    #[serde(default)]
    pub connections: Vec<String>,
    /// Who may show up here.
    #[serde(default)]
    pub spawn_table: Vec<SpawnEntry>,
    /// Free-form tags used for retrieval.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A non-player character template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcDef {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Prose description.
    #[serde(default)]
    pub description: String,
    /// Faction id.
    #[serde(default)]
    pub faction: Option<String>,
    /// Stats by name.
    #[serde(default)]
    pub stats: BTreeMap<String, i32>,
    /// Starting hit points.
    #[serde(default = "default_hit_points")]
    pub hit_points: i32,
    /// Hidden motive.
    #[serde(default)]
    pub secret_agenda: Option<String>,
}

fn default_hit_points() -> i32 {
    8
}

/// A faction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionDef {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Prose description.
    #[serde(default)]
    pub description: String,
}

/// A quest template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestDef {
    /// Identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Ordered stage names.
    #[serde(default)]
    pub stages: Vec<String>,
}

/// A piece of lore or style guidance for retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreEntry {
    /// Identifier, used as the citation.
    pub id: String,
    /// `lore` or `style`.
    #[serde(default = "default_lore_kind")]
    pub kind: String,
    /// Text.
    pub text: String,
    /// Keywords.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_lore_kind() -> String {
    "lore".to_owned()
}

/// Read-only content lookups. Misses are `None`; callers decide how to
/// degrade.
pub trait ContentSource: Send + Sync {
    /// Looks up a location.
    fn location(&self, id: &str) -> Option<&LocationDef>;

    /// Looks up an NPC template.
    fn npc(&self, id: &str) -> Option<&NpcDef>;

    /// Looks up a faction.
    fn faction(&self, id: &str) -> Option<&FactionDef>;

    /// Looks up a quest template.
    fn quest(&self, id: &str) -> Option<&QuestDef>;

    /// One-line tone guidance for prompts.
    fn tone(&self) -> &str;
}

/// Content source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContent;

impl ContentSource for EmptyContent {
    fn location(&self, _id: &str) -> Option<&LocationDef> {
        None
    }

    fn npc(&self, _id: &str) -> Option<&NpcDef> {
        None
    }

    fn faction(&self, _id: &str) -> Option<&FactionDef> {
        None
    }

    fn quest(&self, _id: &str) -> Option<&QuestDef> {
        None
    }

    fn tone(&self) -> &str {
        "grounded, concise, second person"
    }
}

#[derive(Debug, Deserialize)]
struct EraPackFile {
    id: String,
    name: String,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    locations: Vec<LocationDef>,
    #[serde(default)]
    npcs: Vec<NpcDef>,
    #[serde(default)]
    factions: Vec<FactionDef>,
    #[serde(default)]
    quests: Vec<QuestDef>,
    #[serde(default)]
    lore: Vec<LoreEntry>,
}

/// An era pack loaded from YAML, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct EraPack {
    /// Pack id, matching a campaign's time period.
    pub id: String,
    /// Display name.
    pub name: String,
    tone: String,
    locations: HashMap<String, LocationDef>,
    npcs: HashMap<String, NpcDef>,
    factions: HashMap<String, FactionDef>,
    quests: HashMap<String, QuestDef>,
    lore: Vec<LoreEntry>,
}

impl EraPack {
    /// Parses a pack.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for malformed YAML, duplicate ids,
    /// or spawn tables naming unknown NPCs.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DomainError> {
        let file: EraPackFile = serde_yaml::from_str(yaml)
            .map_err(|e| DomainError::Validation(format!("invalid era pack: {e}")))?;

        let pack = Self {
            id: file.id,
            name: file.name,
            tone: file
                .tone
                .unwrap_or_else(|| EmptyContent.tone().to_owned()),
            locations: index("location", file.locations, |l| &l.id)?,
            npcs: index("npc", file.npcs, |n| &n.id)?,
            factions: index("faction", file.factions, |f| &f.id)?,
            quests: index("quest", file.quests, |q| &q.id)?,
            lore: file.lore,
        };

        for location in pack.locations.values() {
            if let Some(entry) = location
                .spawn_table
                .iter()
                .find(|entry| !pack.npcs.contains_key(&entry.npc_id))
            {
                return Err(DomainError::Validation(format!(
                    "location {} spawns unknown npc {}",
                    location.id, entry.npc_id
                )));
            }
        }
        Ok(pack)
    }

    /// Loads a pack from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the file cannot be read, and
    /// the errors of [`EraPack::from_yaml_str`].
    pub fn load(path: &Path) -> Result<Self, DomainError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Infrastructure(format!("cannot read era pack {}: {e}", path.display()))
        })?;
        let pack = Self::from_yaml_str(&yaml)?;
        info!(
            era = %pack.id,
            locations = pack.locations.len(),
            npcs = pack.npcs.len(),
            lore = pack.lore.len(),
            "era pack loaded"
        );
        Ok(pack)
    }

    /// Lore and style entries.
    #[must_use]
    pub fn lore(&self) -> &[LoreEntry] {
        &self.lore
    }
}

fn index<T>(
    kind: &str,
    items: Vec<T>,
    id_of: impl Fn(&T) -> &String,
) -> Result<HashMap<String, T>, DomainError> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let id = id_of(&item).clone();
        if map.insert(id.clone(), item).is_some() {
            return Err(DomainError::Validation(format!("duplicate {kind} id {id}")));
        }
    }
    Ok(map)
}

impl ContentSource for EraPack {
    fn location(&self, id: &str) -> Option<&LocationDef> {
        self.locations.get(id)
    }

    fn npc(&self, id: &str) -> Option<&NpcDef> {
        self.npcs.get(id)
    }

    fn faction(&self, id: &str) -> Option<&FactionDef> {
        self.factions.get(id)
    }

    fn quest(&self, id: &str) -> Option<&QuestDef> {
        self.quests.get(id)
    }

    fn tone(&self) -> &str {
        &self.tone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACK: &str = r"
id: gaslight
name: Gaslight London
tone: foggy, wry, tense
locations:
  - id: docks
    name: The Docks
    danger: 2
    encounter_chance: 40
    connections: [market]
    spawn_table:
      - npc_id: smuggler
        weight: 3
npcs:
  - id: smuggler
    name: Quill
    stats: { dexterity: 14 }
    secret_agenda: sells to both sides
factions:
  - id: lamplighters
    name: The Lamplighters
quests:
  - id: dark_street
    title: The Dark Street
    stages: [rumor, search, confrontation]
lore:
  - id: fog
    text: The fog off the river carries voices further than it should.
    tags: [docks, river]
";

    #[test]
    fn test_pack_indexes_every_section() {
        let pack = EraPack::from_yaml_str(PACK).unwrap();

        assert_eq!(pack.tone(), "foggy, wry, tense");
        let docks = pack.location("docks").unwrap();
        assert_eq!(docks.danger, 2);
        assert_eq!(docks.spawn_table[0].weight, 3);
        assert_eq!(pack.npc("smuggler").unwrap().hit_points, 8);
        assert!(pack.faction("lamplighters").is_some());
        assert_eq!(pack.quest("dark_street").unwrap().stages.len(), 3);
        assert_eq!(pack.lore()[0].kind, "lore");
        assert!(pack.location("palace").is_none());
    }

    #[test]
    fn test_spawn_table_must_reference_known_npcs() {
        let yaml = PACK.replace("npc_id: smuggler", "npc_id: ghost");

        let result = EraPack::from_yaml_str(&yaml);

        match result {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("unknown npc ghost")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let yaml = PACK.replace(
            "  - id: lamplighters\n    name: The Lamplighters\n",
            "  - id: lamplighters\n    name: A\n  - id: lamplighters\n    name: B\n",
        );

        assert!(matches!(
            EraPack::from_yaml_str(&yaml),
            Err(DomainError::Validation(msg)) if msg.contains("duplicate faction")
        ));
    }
}
