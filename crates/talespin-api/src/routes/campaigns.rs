//! Routes for campaigns and their turns.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use talespin_core::error::DomainError;
use talespin_core::repository::RenderedTurn;
use talespin_narrative::TurnResult;
use talespin_world_state::application::query_handlers::{CharacterSheet, quest_log};
use talespin_world_state::domain::commands::{CreateCampaign, StartingItem, StartingQuest};
use talespin_world_state::domain::events::{CharacterRole, CharacterSeed, PsychProfile};
use talespin_world_state::domain::projection::{CampaignView, InventoryItem, QuestEntry};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

fn default_hit_points() -> i32 {
    10
}

/// A starting character. Ids may be supplied so starting items can refer
/// to their owners.
#[derive(Debug, Deserialize)]
pub struct CharacterRequest {
    #[serde(default = "Uuid::new_v4")]
    pub character_id: Uuid,
    pub name: String,
    pub role: CharacterRole,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub stats: BTreeMap<String, i32>,
    #[serde(default = "default_hit_points")]
    pub hit_points: i32,
    /// Defaults to `hit_points`.
    #[serde(default)]
    pub max_hit_points: Option<i32>,
    #[serde(default)]
    pub relationship: i32,
    #[serde(default)]
    pub secret_agenda: Option<String>,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub psych: PsychProfile,
}

impl From<CharacterRequest> for CharacterSeed {
    fn from(request: CharacterRequest) -> Self {
        Self {
            character_id: request.character_id,
            name: request.name,
            role: request.role,
            location_id: request.location_id,
            stats: request.stats,
            hit_points: request.hit_points,
            max_hit_points: request.max_hit_points.unwrap_or(request.hit_points),
            relationship: request.relationship,
            secret_agenda: request.secret_agenda,
            credits: request.credits,
            psych: request.psych,
        }
    }
}

/// Request body for POST /api/v1/campaigns.
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub title: String,
    pub time_period: String,
    #[serde(default)]
    pub world_state: serde_json::Value,
    pub characters: Vec<CharacterRequest>,
    #[serde(default)]
    pub items: Vec<StartingItem>,
    #[serde(default)]
    pub quests: Vec<StartingQuest>,
}

/// A created character.
#[derive(Debug, Serialize)]
pub struct CharacterSummary {
    pub character_id: Uuid,
    pub name: String,
    pub role: CharacterRole,
}

/// Response body for POST /api/v1/campaigns.
#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub campaign_id: Uuid,
    pub player_id: Uuid,
    pub characters: Vec<CharacterSummary>,
}

/// Query for GET /api/v1/campaigns/{campaign_id}/state.
#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub player_id: Uuid,
}

/// Player-facing view of the last committed state.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub campaign_id: Uuid,
    /// Latest committed turn.
    pub turn_number: i64,
    pub campaign: CampaignView,
    pub character_sheet: CharacterSheet,
    pub inventory: Vec<InventoryItem>,
    pub quest_log: Vec<QuestEntry>,
    pub companions: Vec<CharacterSheet>,
    /// Names of the NPCs sharing the player's location.
    pub nearby: Vec<String>,
}

/// Request body for POST /api/v1/campaigns/{campaign_id}/turns.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub player_id: Uuid,
    pub user_input: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub include_state: bool,
}

/// POST /api/v1/campaigns
#[instrument(skip(state, request), fields(title = %request.title))]
async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), ApiError> {
    let world_state = if request.world_state.is_null() {
        serde_json::json!({})
    } else {
        request.world_state
    };
    let command = CreateCampaign {
        correlation_id: Uuid::new_v4(),
        campaign_id: Uuid::new_v4(),
        title: request.title,
        time_period: request.time_period,
        world_state,
        characters: request.characters.into_iter().map(CharacterSeed::from).collect(),
        items: request.items,
        quests: request.quests,
    };

    let player_id = command.player().map(|p| p.character_id).ok_or_else(|| {
        DomainError::Validation("campaign needs exactly one player character".into())
    })?;

    info!(correlation_id = %command.correlation_id, "handling create_campaign command");

    state.orchestrator.create_campaign(&command).await?;

    let characters = command
        .characters
        .iter()
        .map(|c| CharacterSummary {
            character_id: c.character_id,
            name: c.name.clone(),
            role: c.role,
        })
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            campaign_id: command.campaign_id,
            player_id,
            characters,
        }),
    ))
}

/// GET /api/v1/campaigns/{campaign_id}/state
#[instrument(skip(state))]
async fn read_state(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateResponse>, ApiError> {
    let snapshot = state.orchestrator.state(campaign_id, query.player_id).await?;

    Ok(Json(StateResponse {
        campaign_id,
        turn_number: snapshot.last_turn(),
        campaign: snapshot.campaign().clone(),
        character_sheet: CharacterSheet::from(snapshot.player()),
        inventory: snapshot.player_inventory().into_iter().cloned().collect(),
        quest_log: quest_log(&snapshot.projection),
        companions: snapshot
            .companions()
            .into_iter()
            .map(CharacterSheet::from)
            .collect(),
        nearby: snapshot
            .npcs_near_player()
            .into_iter()
            .map(|c| c.name.clone())
            .collect(),
    }))
}

/// POST /api/v1/campaigns/{campaign_id}/turns
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
async fn run_turn(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResult>, ApiError> {
    let lock = state.turn_locks.for_campaign(campaign_id);
    let _turn = lock.lock().await;

    let result = state
        .orchestrator
        .run_turn(
            campaign_id,
            request.player_id,
            &request.user_input,
            request.debug,
            request.include_state,
        )
        .await?;

    info!(
        turn_number = result.turn_number,
        route = result.route.as_str(),
        warnings = result.warnings.len(),
        "turn served"
    );
    Ok(Json(result))
}

/// GET /api/v1/campaigns/{campaign_id}/turns/{turn_number}
#[instrument(skip(state))]
async fn rendered_turn(
    State(state): State<AppState>,
    Path((campaign_id, turn_number)): Path<(Uuid, i64)>,
) -> Result<Json<RenderedTurn>, ApiError> {
    state
        .orchestrator
        .rendered_turn(campaign_id, turn_number)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("turn {turn_number} has no narration")))
}

/// Returns the router for campaigns.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/campaigns", post(create_campaign))
        .route("/api/v1/campaigns/{campaign_id}/state", get(read_state))
        .route("/api/v1/campaigns/{campaign_id}/turns", post(run_turn))
        .route(
            "/api/v1/campaigns/{campaign_id}/turns/{turn_number}",
            get(rendered_turn),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_request_fills_defaults() {
        let request: CharacterRequest =
            serde_json::from_value(serde_json::json!({ "name": "Ada", "role": "player" }))
                .unwrap();

        let seed = CharacterSeed::from(request);

        assert_eq!(seed.hit_points, 10);
        assert_eq!(seed.max_hit_points, 10);
        assert_eq!(seed.psych, PsychProfile::default());
        assert!(seed.location_id.is_none());
    }

    #[test]
    fn test_turn_request_flags_default_to_false() {
        let request: TurnRequest = serde_json::from_value(serde_json::json!({
            "player_id": Uuid::new_v4(),
            "user_input": "look around",
        }))
        .unwrap();

        assert!(!request.debug);
        assert!(!request.include_state);
    }
}
