//! `PostgreSQL` implementation of the storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use talespin_core::error::DomainError;
use talespin_core::event::{NewTurnEvent, TurnEvent};
use talespin_core::repository::{
    CampaignRecord, EventRepository, RenderedTurn, check_turn_order,
};
use talespin_world_state::domain::projection::CampaignProjection;
use talespin_world_state::domain::repository::ProjectionRepository;
use tracing::debug;
use uuid::Uuid;

type TurnEventRow = (
    Uuid,
    Uuid,
    i64,
    i32,
    String,
    Value,
    bool,
    bool,
    DateTime<Utc>,
);

type RenderedTurnRow = (
    Uuid,
    Uuid,
    i64,
    String,
    Json<Vec<String>>,
    Json<Vec<String>>,
    DateTime<Utc>,
);

const SELECT_EVENTS: &str = "SELECT event_id, campaign_id, turn_number, sequence, event_type, \
     payload, hidden, is_public_rumor, occurred_at \
     FROM turn_events WHERE campaign_id = $1 AND turn_number > $2 \
     ORDER BY turn_number, sequence";

fn storage_error(error: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(error.to_string())
}

fn into_event(row: TurnEventRow) -> TurnEvent {
    let (
        event_id,
        campaign_id,
        turn_number,
        sequence,
        event_type,
        payload,
        hidden,
        is_public_rumor,
        occurred_at,
    ) = row;
    TurnEvent {
        event_id,
        campaign_id,
        turn_number,
        sequence,
        event_type,
        payload,
        hidden,
        is_public_rumor,
        occurred_at,
    }
}

/// PostgreSQL-backed event log and projection store.
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks the campaign row for the rest of the transaction, serializing
    /// concurrent appends to one campaign, and returns its last turn.
    async fn lock_campaign(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: Uuid,
    ) -> Result<Option<i64>, DomainError> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT campaign_id FROM campaigns WHERE campaign_id = $1 FOR UPDATE")
                .bind(campaign_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(storage_error)?;
        if found.is_none() {
            return Err(DomainError::CampaignNotFound(campaign_id));
        }

        sqlx::query_scalar("SELECT MAX(turn_number) FROM turn_events WHERE campaign_id = $1")
            .bind(campaign_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(storage_error)
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        event: &TurnEvent,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO turn_events (event_id, campaign_id, turn_number, sequence, event_type, \
             payload, hidden, is_public_rumor, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.event_id)
        .bind(event.campaign_id)
        .bind(event.turn_number)
        .bind(event.sequence)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.hidden)
        .bind(event.is_public_rumor)
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn create_campaign(&self, campaign: &CampaignRecord) -> Result<(), DomainError> {
        let result = sqlx::query(
            "INSERT INTO campaigns (campaign_id, title, time_period, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (campaign_id) DO NOTHING",
        )
        .bind(campaign.campaign_id)
        .bind(&campaign.title)
        .bind(&campaign.time_period)
        .bind(campaign.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::Validation(format!(
                "campaign {} already exists",
                campaign.campaign_id
            )));
        }
        Ok(())
    }

    async fn load_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, DomainError> {
        let row: Option<(Uuid, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT campaign_id, title, time_period, created_at FROM campaigns \
             WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|(campaign_id, title, time_period, created_at)| CampaignRecord {
            campaign_id,
            title,
            time_period,
            created_at,
        })
        .ok_or(DomainError::CampaignNotFound(campaign_id))
    }

    async fn last_turn(&self, campaign_id: Uuid) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar("SELECT MAX(turn_number) FROM turn_events WHERE campaign_id = $1")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn load_events(&self, campaign_id: Uuid) -> Result<Vec<TurnEvent>, DomainError> {
        self.load_events_after(campaign_id, -1).await
    }

    async fn load_events_after(
        &self,
        campaign_id: Uuid,
        after_turn: i64,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        let rows: Vec<TurnEventRow> = sqlx::query_as(SELECT_EVENTS)
            .bind(campaign_id)
            .bind(after_turn)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(into_event).collect())
    }

    async fn append_event(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        event: NewTurnEvent,
    ) -> Result<Uuid, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let last_turn = Self::lock_campaign(&mut tx, campaign_id).await?;
        check_turn_order(campaign_id, last_turn, turn_number, true)?;

        let sequence: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM turn_events \
             WHERE campaign_id = $1 AND turn_number = $2",
        )
        .bind(campaign_id)
        .bind(turn_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        let stored = event.into_stored(campaign_id, turn_number, sequence);
        Self::insert_event(&mut tx, &stored).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(stored.event_id)
    }

    async fn append_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        events: Vec<NewTurnEvent>,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let last_turn = Self::lock_campaign(&mut tx, campaign_id).await?;
        check_turn_order(campaign_id, last_turn, turn_number, false)?;

        let stored: Vec<TurnEvent> = events
            .into_iter()
            .zip(0..)
            .map(|(event, sequence)| event.into_stored(campaign_id, turn_number, sequence))
            .collect();
        for event in &stored {
            Self::insert_event(&mut tx, event).await?;
        }
        tx.commit().await.map_err(storage_error)?;
        debug!(%campaign_id, turn_number, count = stored.len(), "turn appended");
        Ok(stored)
    }

    async fn cache_rendered_turn(&self, turn: &RenderedTurn) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO rendered_turns (id, campaign_id, turn_number, rendered_text, citations, \
             suggested_actions, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (campaign_id, turn_number) DO NOTHING",
        )
        .bind(turn.id)
        .bind(turn.campaign_id)
        .bind(turn.turn_number)
        .bind(&turn.text)
        .bind(Json(&turn.citations))
        .bind(Json(&turn.suggested_actions))
        .bind(turn.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn load_rendered_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError> {
        let row: Option<RenderedTurnRow> = sqlx::query_as(
            "SELECT id, campaign_id, turn_number, rendered_text, citations, suggested_actions, \
             created_at FROM rendered_turns WHERE campaign_id = $1 AND turn_number = $2",
        )
        .bind(campaign_id)
        .bind(turn_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(
            |(id, campaign_id, turn_number, text, citations, suggested_actions, created_at)| {
                RenderedTurn {
                    id,
                    campaign_id,
                    turn_number,
                    text,
                    citations: citations.0,
                    suggested_actions: suggested_actions.0,
                    created_at,
                }
            },
        ))
    }
}

#[async_trait]
impl ProjectionRepository for PgEventRepository {
    async fn load_projection(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignProjection>, DomainError> {
        let row: Option<(Json<CampaignProjection>,)> =
            sqlx::query_as("SELECT snapshot FROM campaign_projections WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(|(snapshot,)| snapshot.0))
    }

    /// Rewrites the normalized projection tables and the snapshot in one
    /// transaction.
    async fn save_projection(&self, projection: &CampaignProjection) -> Result<(), DomainError> {
        let campaign_id = projection.campaign_id;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        if let Some(campaign) = &projection.campaign {
            sqlx::query(
                "UPDATE campaigns SET world_state = $2, world_time_minutes = $3 \
                 WHERE campaign_id = $1",
            )
            .bind(campaign_id)
            .bind(&campaign.world_state)
            .bind(campaign.world_time_minutes)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        sqlx::query("DELETE FROM inventory_items WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        sqlx::query("DELETE FROM characters WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        for character in projection.characters.values() {
            sqlx::query(
                "INSERT INTO characters (character_id, campaign_id, name, role, location_id, \
                 stats, hit_points, max_hit_points, relationship, secret_agenda, credits, \
                 psych_profile) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(character.character_id)
            .bind(campaign_id)
            .bind(&character.name)
            .bind(character.role.as_str())
            .bind(&character.location_id)
            .bind(Json(&character.stats))
            .bind(character.hit_points)
            .bind(character.max_hit_points)
            .bind(character.relationship)
            .bind(&character.secret_agenda)
            .bind(character.credits)
            .bind(Json(&character.psych))
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        for item in projection.inventory.values() {
            sqlx::query(
                "INSERT INTO inventory_items (item_id, campaign_id, owner_id, item_name, \
                 quantity, attributes) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.item_id)
            .bind(campaign_id)
            .bind(item.owner_id)
            .bind(&item.item_name)
            .bind(item.quantity)
            .bind(&item.attributes)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        sqlx::query(
            "INSERT INTO campaign_projections (campaign_id, last_turn, last_sequence, snapshot, \
             updated_at) VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (campaign_id) DO UPDATE SET last_turn = EXCLUDED.last_turn, \
             last_sequence = EXCLUDED.last_sequence, snapshot = EXCLUDED.snapshot, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(campaign_id)
        .bind(projection.last_applied.map(|p| p.turn_number))
        .bind(projection.last_applied.map(|p| p.sequence))
        .bind(Json(projection))
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        debug!(%campaign_id, "projection saved");
        Ok(())
    }
}
