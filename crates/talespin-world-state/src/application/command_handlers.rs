//! Command handlers for the World State context.
//!
//! Campaign setup and projection maintenance. The projection fold itself is
//! pure; these handlers only add loading and saving around it.

use talespin_core::clock::Clock;
use talespin_core::error::DomainError;
use talespin_core::event::{DomainEvent, NewTurnEvent, TurnEvent};
use talespin_core::repository::{CampaignRecord, EventRepository};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::commands::CreateCampaign;
use crate::domain::events::{
    CampaignCreated, CharacterCreated, GameEvent, ItemAcquired, QuestUpdated,
};
use crate::domain::projection::CampaignProjection;
use crate::domain::repository::ProjectionRepository;

/// Folds `events` onto `base` (or onto an empty projection).
///
/// Applying the same prefix twice is a no-op, so replaying from scratch and
/// applying incrementally converge on the same projection.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if an event cannot be decoded or
/// belongs to another campaign.
pub fn apply_projection(
    campaign_id: Uuid,
    base: Option<CampaignProjection>,
    events: &[TurnEvent],
) -> Result<CampaignProjection, DomainError> {
    let mut projection = base.unwrap_or_else(|| CampaignProjection::empty(campaign_id));
    projection.apply_all(events)?;
    Ok(projection)
}

/// Loads the stored projection and folds every event it has not seen yet.
///
/// # Errors
///
/// Returns `DomainError` if loading or decoding fails.
pub(crate) async fn catch_up(
    campaign_id: Uuid,
    events: &dyn EventRepository,
    projections: &dyn ProjectionRepository,
) -> Result<(CampaignProjection, bool), DomainError> {
    let stored = projections.load_projection(campaign_id).await?;
    let pending = match stored.as_ref().and_then(CampaignProjection::last_turn) {
        // Re-read the latest folded turn too: it may have been extended.
        Some(last) => events.load_events_after(campaign_id, last - 1).await?,
        None => events.load_events(campaign_id).await?,
    };
    let before = stored.as_ref().and_then(|p| p.last_applied);
    let projection = apply_projection(campaign_id, stored, &pending)?;
    let advanced = projection.last_applied != before;
    if advanced {
        debug!(%campaign_id, folded_through = ?projection.last_applied, "projection caught up");
    }
    Ok((projection, advanced))
}

/// Brings the stored projection up to date with the log and saves it.
///
/// # Errors
///
/// Returns `DomainError` if loading, decoding or saving fails.
pub async fn handle_refresh_projection(
    campaign_id: Uuid,
    events: &dyn EventRepository,
    projections: &dyn ProjectionRepository,
) -> Result<CampaignProjection, DomainError> {
    let (projection, advanced) = catch_up(campaign_id, events, projections).await?;
    if advanced {
        projections.save_projection(&projection).await?;
    }
    Ok(projection)
}

fn validate(command: &CreateCampaign) -> Result<(), DomainError> {
    if command.title.trim().is_empty() {
        return Err(DomainError::Validation("campaign title must not be empty".into()));
    }
    if command.player().is_none() {
        return Err(DomainError::Validation(
            "campaign needs exactly one player character".into(),
        ));
    }
    if let Some(unnamed) = command.characters.iter().find(|c| c.name.trim().is_empty()) {
        return Err(DomainError::Validation(format!(
            "character {} has no name",
            unnamed.character_id
        )));
    }
    for item in &command.items {
        if item.quantity <= 0 {
            return Err(DomainError::Validation(format!(
                "starting item {} must have a positive quantity",
                item.item_name
            )));
        }
        if !command
            .characters
            .iter()
            .any(|c| c.character_id == item.owner_id)
        {
            return Err(DomainError::Validation(format!(
                "starting item {} is owned by unknown character {}",
                item.item_name, item.owner_id
            )));
        }
    }
    Ok(())
}

/// Handles the `CreateCampaign` command: registers the campaign, appends the
/// turn-0 events and saves the initial projection.
///
/// # Errors
///
/// Returns `DomainError::Validation` for malformed setups and any storage
/// error from the repositories.
pub async fn handle_create_campaign(
    command: &CreateCampaign,
    clock: &dyn Clock,
    events: &dyn EventRepository,
    projections: &dyn ProjectionRepository,
) -> Result<CampaignProjection, DomainError> {
    validate(command)?;
    let now = clock.now();

    events
        .create_campaign(&CampaignRecord {
            campaign_id: command.campaign_id,
            title: command.title.clone(),
            time_period: command.time_period.clone(),
            created_at: now,
        })
        .await?;

    let mut setup = vec![GameEvent::CampaignCreated(CampaignCreated {
        campaign_id: command.campaign_id,
        title: command.title.clone(),
        time_period: command.time_period.clone(),
        world_state: command.world_state.clone(),
    })];
    setup.extend(command.characters.iter().map(|character| {
        GameEvent::CharacterCreated(CharacterCreated {
            character: character.clone(),
        })
    }));
    setup.extend(command.items.iter().map(|item| {
        GameEvent::ItemAcquired(ItemAcquired {
            owner_id: item.owner_id,
            item_id: Uuid::now_v7(),
            item_name: item.item_name.clone(),
            quantity: item.quantity,
            attributes: item.attributes.clone(),
        })
    }));
    setup.extend(command.quests.iter().map(|quest| {
        GameEvent::QuestUpdated(QuestUpdated {
            quest_id: quest.quest_id.clone(),
            title: quest.title.clone(),
            status: quest.status,
            stage: quest.stage.clone(),
        })
    }));

    let rows: Vec<NewTurnEvent> = setup.iter().map(|e| e.to_new_event(now)).collect();
    let stored = events.append_turn(command.campaign_id, 0, rows).await?;

    let projection = apply_projection(command.campaign_id, None, &stored)?;
    projections.save_projection(&projection).await?;

    info!(
        campaign_id = %command.campaign_id,
        correlation_id = %command.correlation_id,
        characters = command.characters.len(),
        "campaign created"
    );
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use talespin_core::error::DomainError;
    use talespin_core::repository::EventRepository;
    use talespin_test_support::{FailingEventRepository, FixedClock, RecordingEventRepository};
    use uuid::Uuid;

    use super::*;
    use crate::domain::commands::{StartingItem, StartingQuest};
    use crate::domain::events::{CharacterRole, CharacterSeed, PsychProfile, QuestStatus};

    #[derive(Default)]
    struct MemoryProjections(Mutex<HashMap<Uuid, CampaignProjection>>);

    #[async_trait]
    impl ProjectionRepository for MemoryProjections {
        async fn load_projection(
            &self,
            campaign_id: Uuid,
        ) -> Result<Option<CampaignProjection>, DomainError> {
            Ok(self.0.lock().unwrap().get(&campaign_id).cloned())
        }

        async fn save_projection(
            &self,
            projection: &CampaignProjection,
        ) -> Result<(), DomainError> {
            self.0
                .lock()
                .unwrap()
                .insert(projection.campaign_id, projection.clone());
            Ok(())
        }
    }

    fn fixed_clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    fn character(name: &str, role: CharacterRole) -> CharacterSeed {
        CharacterSeed {
            character_id: Uuid::new_v4(),
            name: name.to_owned(),
            role,
            location_id: Some("market".to_owned()),
            stats: BTreeMap::new(),
            hit_points: 12,
            max_hit_points: 12,
            relationship: 0,
            secret_agenda: None,
            credits: 5,
            psych: PsychProfile::default(),
        }
    }

    fn create_command(characters: Vec<CharacterSeed>) -> CreateCampaign {
        let owner_id = characters[0].character_id;
        CreateCampaign {
            correlation_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            title: "Lanterns".to_owned(),
            time_period: "gaslight".to_owned(),
            world_state: json!({ "factions": { "Lamplighters": 10 } }),
            characters,
            items: vec![StartingItem {
                owner_id,
                item_name: "lantern".to_owned(),
                quantity: 1,
                attributes: json!({ "fuel": 3 }),
            }],
            quests: vec![StartingQuest {
                quest_id: "dark_street".to_owned(),
                title: "The Dark Street".to_owned(),
                status: QuestStatus::Active,
                stage: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_handle_create_campaign_appends_turn_zero_and_saves_projection() {
        // Arrange
        let player = character("Mira", CharacterRole::Player);
        let player_id = player.character_id;
        let command = create_command(vec![player, character("Tobin", CharacterRole::Companion)]);
        let events = RecordingEventRepository::new(Vec::new());
        let projections = MemoryProjections::default();

        // Act
        let projection =
            handle_create_campaign(&command, &fixed_clock(), &events, &projections)
                .await
                .unwrap();

        // Assert
        let appended = events.appended_turns();
        assert_eq!(appended.len(), 1);
        let (campaign_id, turn, rows) = &appended[0];
        assert_eq!(*campaign_id, command.campaign_id);
        assert_eq!(*turn, 0);
        let types: Vec<&str> = rows.iter().map(|r| r.event_type.as_str()).collect();
        assert_eq!(
            types,
            [
                "campaign_created",
                "character_created",
                "character_created",
                "item_acquired",
                "quest_updated"
            ]
        );
        assert_eq!(projection.characters.len(), 2);
        assert_eq!(projection.inventory_of(player_id).len(), 1);
        assert_eq!(projection.last_turn(), Some(0));
        assert!(
            projections
                .load_projection(command.campaign_id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_handle_create_campaign_requires_exactly_one_player() {
        let command = create_command(vec![
            character("A", CharacterRole::Player),
            character("B", CharacterRole::Player),
        ]);

        let result = handle_create_campaign(
            &command,
            &fixed_clock(),
            &RecordingEventRepository::new(Vec::new()),
            &MemoryProjections::default(),
        )
        .await;

        match result {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("exactly one player")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_create_campaign_propagates_storage_failure() {
        let command = create_command(vec![character("Mira", CharacterRole::Player)]);

        let result = handle_create_campaign(
            &command,
            &fixed_clock(),
            &FailingEventRepository,
            &MemoryProjections::default(),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }

    #[tokio::test]
    async fn test_handle_refresh_projection_folds_only_new_events() {
        // Arrange
        let command = create_command(vec![character("Mira", CharacterRole::Player)]);
        let events = RecordingEventRepository::new(Vec::new());
        let projections = MemoryProjections::default();
        handle_create_campaign(&command, &fixed_clock(), &events, &projections)
            .await
            .unwrap();
        let now = fixed_clock().now();
        events
            .append_turn(
                command.campaign_id,
                1,
                vec![
                    GameEvent::TimeAdvanced(crate::domain::events::TimeAdvanced { minutes: 30 })
                        .to_new_event(now),
                ],
            )
            .await
            .unwrap();

        // Act
        let projection =
            handle_refresh_projection(command.campaign_id, &events, &projections)
                .await
                .unwrap();

        // Assert
        assert_eq!(projection.last_turn(), Some(1));
        assert_eq!(projection.campaign.unwrap().world_time_minutes, 30);
        let saved = projections
            .load_projection(command.campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.last_turn(), Some(1));
    }
}
