//! In-memory implementations of the storage ports.
//!
//! Used when no database is configured and by the orchestrator tests. They
//! enforce the same contracts as the `PostgreSQL` store: appends require an
//! existing campaign, turn numbers may not skip or go backwards, a turn is
//! appended all-or-nothing, and rendered turns are written once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use talespin_core::error::DomainError;
use talespin_core::event::{NewTurnEvent, TurnEvent};
use talespin_core::repository::{
    CampaignRecord, EventRepository, RenderedTurn, check_turn_order,
};
use talespin_world_state::domain::projection::CampaignProjection;
use talespin_world_state::domain::repository::ProjectionRepository;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Log {
    campaigns: HashMap<Uuid, CampaignRecord>,
    events: HashMap<Uuid, Vec<TurnEvent>>,
    rendered: HashMap<(Uuid, i64), RenderedTurn>,
}

impl Log {
    fn require_campaign(&self, campaign_id: Uuid) -> Result<(), DomainError> {
        if self.campaigns.contains_key(&campaign_id) {
            Ok(())
        } else {
            Err(DomainError::CampaignNotFound(campaign_id))
        }
    }

    fn last_turn(&self, campaign_id: Uuid) -> Option<i64> {
        self.events
            .get(&campaign_id)
            .and_then(|events| events.last())
            .map(|e| e.turn_number)
    }
}

/// Process-local event log.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    log: Mutex<Log>,
}

impl InMemoryEventRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Log>, DomainError> {
        self.log
            .lock()
            .map_err(|_| DomainError::Infrastructure("event log lock poisoned".into()))
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn create_campaign(&self, campaign: &CampaignRecord) -> Result<(), DomainError> {
        let mut log = self.lock()?;
        if log.campaigns.contains_key(&campaign.campaign_id) {
            return Err(DomainError::Validation(format!(
                "campaign {} already exists",
                campaign.campaign_id
            )));
        }
        log.campaigns.insert(campaign.campaign_id, campaign.clone());
        Ok(())
    }

    async fn load_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, DomainError> {
        self.lock()?
            .campaigns
            .get(&campaign_id)
            .cloned()
            .ok_or(DomainError::CampaignNotFound(campaign_id))
    }

    async fn last_turn(&self, campaign_id: Uuid) -> Result<Option<i64>, DomainError> {
        Ok(self.lock()?.last_turn(campaign_id))
    }

    async fn load_events(&self, campaign_id: Uuid) -> Result<Vec<TurnEvent>, DomainError> {
        Ok(self
            .lock()?
            .events
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_events_after(
        &self,
        campaign_id: Uuid,
        after_turn: i64,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        Ok(self
            .lock()?
            .events
            .get(&campaign_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.turn_number > after_turn)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_event(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        event: NewTurnEvent,
    ) -> Result<Uuid, DomainError> {
        let mut log = self.lock()?;
        log.require_campaign(campaign_id)?;
        check_turn_order(campaign_id, log.last_turn(campaign_id), turn_number, true)?;

        let events = log.events.entry(campaign_id).or_default();
        let sequence = events
            .last()
            .filter(|e| e.turn_number == turn_number)
            .map_or(0, |e| e.sequence + 1);
        let stored = event.into_stored(campaign_id, turn_number, sequence);
        let event_id = stored.event_id;
        events.push(stored);
        Ok(event_id)
    }

    async fn append_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        events: Vec<NewTurnEvent>,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        let mut log = self.lock()?;
        log.require_campaign(campaign_id)?;
        check_turn_order(campaign_id, log.last_turn(campaign_id), turn_number, false)?;

        let stored: Vec<TurnEvent> = events
            .into_iter()
            .zip(0..)
            .map(|(event, sequence)| event.into_stored(campaign_id, turn_number, sequence))
            .collect();
        log.events
            .entry(campaign_id)
            .or_default()
            .extend(stored.iter().cloned());
        debug!(%campaign_id, turn_number, count = stored.len(), "turn appended");
        Ok(stored)
    }

    async fn cache_rendered_turn(&self, turn: &RenderedTurn) -> Result<(), DomainError> {
        let mut log = self.lock()?;
        log.require_campaign(turn.campaign_id)?;
        log.rendered
            .entry((turn.campaign_id, turn.turn_number))
            .or_insert_with(|| turn.clone());
        Ok(())
    }

    async fn load_rendered_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError> {
        Ok(self
            .lock()?
            .rendered
            .get(&(campaign_id, turn_number))
            .cloned())
    }
}

/// Process-local projection storage.
#[derive(Debug, Default)]
pub struct InMemoryProjectionRepository {
    projections: Mutex<HashMap<Uuid, CampaignProjection>>,
}

impl InMemoryProjectionRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, CampaignProjection>>, DomainError> {
        self.projections
            .lock()
            .map_err(|_| DomainError::Infrastructure("projection lock poisoned".into()))
    }
}

#[async_trait]
impl ProjectionRepository for InMemoryProjectionRepository {
    async fn load_projection(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignProjection>, DomainError> {
        Ok(self.lock()?.get(&campaign_id).cloned())
    }

    async fn save_projection(&self, projection: &CampaignProjection) -> Result<(), DomainError> {
        self.lock()?
            .insert(projection.campaign_id, projection.clone());
        Ok(())
    }
}
