//! Query handlers for the World State context.
//!
//! Read-only views over the last committed state. Nothing here writes to
//! storage: a stale projection is caught up in memory only.

use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;
use talespin_core::event::TurnEvent;
use talespin_core::repository::{EventRepository, RenderedTurn};
use uuid::Uuid;

use crate::application::command_handlers;
use crate::domain::events::{CharacterRole, GameEvent, PsychProfile};
use crate::domain::projection::{
    CampaignProjection, CampaignView, CharacterRecord, InventoryItem, QuestEntry, decode,
};
use crate::domain::repository::ProjectionRepository;

/// The state of a campaign as of its last committed turn, seen from one
/// player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The acting player character.
    pub player_id: Uuid,
    /// The full projection.
    pub projection: CampaignProjection,
}

impl StateSnapshot {
    /// The campaign row.
    ///
    /// # Panics
    ///
    /// Never: `read_state` only builds snapshots of created campaigns.
    #[must_use]
    pub fn campaign(&self) -> &CampaignView {
        self.projection
            .campaign
            .as_ref()
            .expect("snapshots are only built for created campaigns")
    }

    /// The player character.
    ///
    /// # Panics
    ///
    /// Never: `read_state` verifies the player exists.
    #[must_use]
    pub fn player(&self) -> &CharacterRecord {
        self.projection
            .characters
            .get(&self.player_id)
            .expect("snapshots are only built for existing players")
    }

    /// Latest committed turn.
    #[must_use]
    pub fn last_turn(&self) -> i64 {
        self.projection.last_turn().unwrap_or(0)
    }

    /// Living companions, in id order.
    #[must_use]
    pub fn companions(&self) -> Vec<&CharacterRecord> {
        self.projection
            .characters
            .values()
            .filter(|c| c.role == CharacterRole::Companion && c.is_alive())
            .collect()
    }

    /// Living NPCs sharing the player's location.
    #[must_use]
    pub fn npcs_near_player(&self) -> Vec<&CharacterRecord> {
        let player = self.player();
        player
            .location_id
            .as_deref()
            .map(|location| {
                self.projection
                    .characters_at(location, player.character_id)
                    .into_iter()
                    .filter(|c| c.role == CharacterRole::Npc)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The player's inventory.
    #[must_use]
    pub fn player_inventory(&self) -> Vec<&InventoryItem> {
        self.projection.inventory_of(self.player_id)
    }
}

/// Player-facing character sheet. Omits the secret agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    /// Character identifier.
    pub character_id: Uuid,
    /// Display name.
    pub name: String,
    /// Campaign role.
    pub role: CharacterRole,
    /// Current location.
    pub location_id: Option<String>,
    /// Stats.
    pub stats: std::collections::BTreeMap<String, i32>,
    /// Current hit points.
    pub hit_points: i32,
    /// Hit point ceiling.
    pub max_hit_points: i32,
    /// Money.
    pub credits: i64,
    /// Psychological profile.
    pub psych: PsychProfile,
}

impl From<&CharacterRecord> for CharacterSheet {
    fn from(record: &CharacterRecord) -> Self {
        Self {
            character_id: record.character_id,
            name: record.name.clone(),
            role: record.role,
            location_id: record.location_id.clone(),
            stats: record.stats.clone(),
            hit_points: record.hit_points,
            max_hit_points: record.max_hit_points,
            credits: record.credits,
            psych: record.psych.clone(),
        }
    }
}

/// Quest log ordered by quest id.
#[must_use]
pub fn quest_log(projection: &CampaignProjection) -> Vec<QuestEntry> {
    projection.quests.values().cloned().collect()
}

/// Returns the current projected state of a campaign for one player.
///
/// # Errors
///
/// Returns `DomainError::CampaignNotFound` if the campaign does not exist or
/// has no setup events, `DomainError::CharacterNotFound` if `player_id` is
/// not a character of the campaign, and storage/decoding errors otherwise.
pub async fn read_state(
    campaign_id: Uuid,
    player_id: Uuid,
    events: &dyn EventRepository,
    projections: &dyn ProjectionRepository,
) -> Result<StateSnapshot, DomainError> {
    events.load_campaign(campaign_id).await?;
    let (projection, _) = command_handlers::catch_up(campaign_id, events, projections).await?;
    if projection.campaign.is_none() {
        return Err(DomainError::CampaignNotFound(campaign_id));
    }
    if !projection.characters.contains_key(&player_id) {
        return Err(DomainError::CharacterNotFound(player_id));
    }
    Ok(StateSnapshot {
        player_id,
        projection,
    })
}

/// Returns the narration of a committed turn, from the cache or, on a miss,
/// rebuilt from the turn's `turn_narrated` event.
///
/// # Errors
///
/// Returns storage or decoding errors.
pub async fn rendered_turn(
    campaign_id: Uuid,
    turn_number: i64,
    events: &dyn EventRepository,
) -> Result<Option<RenderedTurn>, DomainError> {
    if let Some(cached) = events.load_rendered_turn(campaign_id, turn_number).await? {
        return Ok(Some(cached));
    }
    let turn_events = events.load_events_after(campaign_id, turn_number - 1).await?;
    regenerate_rendered_turn(campaign_id, turn_number, &turn_events)
}

fn regenerate_rendered_turn(
    campaign_id: Uuid,
    turn_number: i64,
    events: &[TurnEvent],
) -> Result<Option<RenderedTurn>, DomainError> {
    for stored in events.iter().filter(|e| e.turn_number == turn_number) {
        if let GameEvent::TurnNarrated(narrated) = decode(stored)? {
            return Ok(Some(RenderedTurn {
                id: stored.event_id,
                campaign_id,
                turn_number,
                text: narrated.text,
                citations: narrated.citations,
                suggested_actions: narrated.suggested_actions,
                created_at: stored.occurred_at,
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use talespin_core::clock::Clock;
    use talespin_core::event::DomainEvent;
    use talespin_core::repository::CampaignRecord;
    use talespin_test_support::{FixedClock, RecordingEventRepository};

    use super::*;
    use crate::domain::events::{
        CampaignCreated, CharacterCreated, CharacterSeed, LocationChanged, TurnNarrated,
    };

    struct NoProjections;

    #[async_trait::async_trait]
    impl ProjectionRepository for NoProjections {
        async fn load_projection(
            &self,
            _campaign_id: Uuid,
        ) -> Result<Option<CampaignProjection>, DomainError> {
            Ok(None)
        }

        async fn save_projection(&self, _p: &CampaignProjection) -> Result<(), DomainError> {
            panic!("queries must not write projections")
        }
    }

    fn seed(name: &str, role: CharacterRole, location: &str) -> CharacterSeed {
        CharacterSeed {
            character_id: Uuid::new_v4(),
            name: name.to_owned(),
            role,
            location_id: Some(location.to_owned()),
            stats: BTreeMap::new(),
            hit_points: 8,
            max_hit_points: 8,
            relationship: 0,
            secret_agenda: Some("betray the party".to_owned()),
            credits: 0,
            psych: PsychProfile::default(),
        }
    }

    async fn seeded_repo(
        characters: &[CharacterSeed],
    ) -> (RecordingEventRepository, Uuid) {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let campaign_id = Uuid::new_v4();
        let repo = RecordingEventRepository::new(Vec::new());
        repo.create_campaign(&CampaignRecord {
            campaign_id,
            title: "Fog".to_owned(),
            time_period: "gaslight".to_owned(),
            created_at: clock.now(),
        })
        .await
        .unwrap();
        let mut setup = vec![
            GameEvent::CampaignCreated(CampaignCreated {
                campaign_id,
                title: "Fog".to_owned(),
                time_period: "gaslight".to_owned(),
                world_state: serde_json::json!({}),
            })
            .to_new_event(clock.now()),
        ];
        setup.extend(characters.iter().map(|c| {
            GameEvent::CharacterCreated(CharacterCreated {
                character: c.clone(),
            })
            .to_new_event(clock.now())
        }));
        repo.append_turn(campaign_id, 0, setup).await.unwrap();
        (repo, campaign_id)
    }

    #[tokio::test]
    async fn test_read_state_replays_log_without_a_stored_projection() {
        // Arrange
        let player = seed("Mira", CharacterRole::Player, "pier");
        let npc = seed("Dockhand", CharacterRole::Npc, "pier");
        let faraway = seed("Clerk", CharacterRole::Npc, "office");
        let companion = seed("Tobin", CharacterRole::Companion, "pier");
        let player_id = player.character_id;
        let (repo, campaign_id) =
            seeded_repo(&[player, npc.clone(), faraway, companion.clone()]).await;

        // Act
        let snapshot = read_state(campaign_id, player_id, &repo, &NoProjections)
            .await
            .unwrap();

        // Assert
        assert_eq!(snapshot.player().name, "Mira");
        assert_eq!(snapshot.last_turn(), 0);
        let near: Vec<Uuid> = snapshot
            .npcs_near_player()
            .iter()
            .map(|c| c.character_id)
            .collect();
        assert_eq!(near, vec![npc.character_id]);
        assert_eq!(snapshot.companions()[0].character_id, companion.character_id);
    }

    #[tokio::test]
    async fn test_read_state_sees_events_committed_after_the_stored_projection() {
        let player = seed("Mira", CharacterRole::Player, "pier");
        let player_id = player.character_id;
        let (repo, campaign_id) = seeded_repo(&[player]).await;
        repo.append_turn(
            campaign_id,
            1,
            vec![
                GameEvent::LocationChanged(LocationChanged {
                    character_id: player_id,
                    location_id: "lighthouse".to_owned(),
                })
                .to_new_event(Utc::now()),
            ],
        )
        .await
        .unwrap();

        let snapshot = read_state(campaign_id, player_id, &repo, &NoProjections)
            .await
            .unwrap();

        assert_eq!(snapshot.player().location_id.as_deref(), Some("lighthouse"));
        assert_eq!(snapshot.last_turn(), 1);
    }

    #[tokio::test]
    async fn test_read_state_rejects_unknown_player() {
        let (repo, campaign_id) =
            seeded_repo(&[seed("Mira", CharacterRole::Player, "pier")]).await;
        let stranger = Uuid::new_v4();

        let result = read_state(campaign_id, stranger, &repo, &NoProjections).await;

        match result {
            Err(DomainError::CharacterNotFound(id)) => assert_eq!(id, stranger),
            other => panic!("expected CharacterNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_state_rejects_unknown_campaign() {
        let repo = RecordingEventRepository::new(Vec::new());

        let result = read_state(Uuid::new_v4(), Uuid::new_v4(), &repo, &NoProjections).await;

        assert!(matches!(result, Err(DomainError::CampaignNotFound(_))));
    }

    #[tokio::test]
    async fn test_rendered_turn_is_rebuilt_from_the_log_on_cache_miss() {
        let (repo, campaign_id) =
            seeded_repo(&[seed("Mira", CharacterRole::Player, "pier")]).await;
        repo.append_turn(
            campaign_id,
            1,
            vec![
                GameEvent::TurnNarrated(TurnNarrated {
                    text: "Fog rolls in.".to_owned(),
                    citations: vec!["lore:fog".to_owned()],
                    suggested_actions: vec!["Wait".to_owned()],
                })
                .to_new_event(Utc::now()),
            ],
        )
        .await
        .unwrap();

        let rendered = rendered_turn(campaign_id, 1, &repo).await.unwrap().unwrap();

        assert_eq!(rendered.text, "Fog rolls in.");
        assert_eq!(rendered.turn_number, 1);
        assert!(rendered_turn(campaign_id, 0, &repo).await.unwrap().is_none());
    }

    #[test]
    fn test_character_sheet_hides_secret_agenda() {
        let record = CharacterRecord {
            character_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            name: "Tobin".to_owned(),
            role: CharacterRole::Companion,
            location_id: None,
            stats: BTreeMap::new(),
            hit_points: 3,
            max_hit_points: 9,
            relationship: 10,
            secret_agenda: Some("sell the map".to_owned()),
            credits: 2,
            psych: PsychProfile::default(),
        };

        let sheet = serde_json::to_value(CharacterSheet::from(&record)).unwrap();

        assert!(sheet.get("secret_agenda").is_none());
        assert_eq!(sheet["hit_points"], 3);
    }
}
