//! Test repositories: `EventRepository` doubles.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use talespin_core::error::DomainError;
use talespin_core::event::{NewTurnEvent, TurnEvent};
use talespin_core::repository::{
    CampaignRecord, EventRepository, RenderedTurn, check_turn_order,
};
use uuid::Uuid;

/// An in-memory event log that records every append. Loads return the
/// preloaded events plus everything appended since, so handlers can be
/// exercised across several calls. Turn ordering is enforced like the real
/// stores; campaign existence is only checked by `load_campaign`.
#[derive(Debug, Default)]
pub struct RecordingEventRepository {
    campaigns: Mutex<HashMap<Uuid, CampaignRecord>>,
    log: Mutex<Vec<TurnEvent>>,
    appended: Mutex<Vec<(Uuid, i64, Vec<TurnEvent>)>>,
    rendered: Mutex<Vec<RenderedTurn>>,
}

impl RecordingEventRepository {
    /// Creates a repository whose log starts with `preloaded`.
    #[must_use]
    pub fn new(preloaded: Vec<TurnEvent>) -> Self {
        Self {
            log: Mutex::new(preloaded),
            ..Self::default()
        }
    }

    /// Returns a snapshot of every append, as `(campaign_id, turn_number,
    /// events)`. Single-event appends are recorded as one-element turns.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_turns(&self) -> Vec<(Uuid, i64, Vec<TurnEvent>)> {
        self.appended.lock().unwrap().clone()
    }

    /// Returns every cached rendered turn.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rendered_turns(&self) -> Vec<RenderedTurn> {
        self.rendered.lock().unwrap().clone()
    }

    fn last_turn_of(log: &[TurnEvent], campaign_id: Uuid) -> Option<i64> {
        log.iter()
            .filter(|e| e.campaign_id == campaign_id)
            .map(|e| e.turn_number)
            .max()
    }

    fn next_sequence(log: &[TurnEvent], campaign_id: Uuid, turn_number: i64) -> i32 {
        log.iter()
            .filter(|e| e.campaign_id == campaign_id && e.turn_number == turn_number)
            .map(|e| e.sequence + 1)
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventRepository for RecordingEventRepository {
    async fn create_campaign(&self, campaign: &CampaignRecord) -> Result<(), DomainError> {
        self.campaigns
            .lock()
            .unwrap()
            .insert(campaign.campaign_id, campaign.clone());
        Ok(())
    }

    async fn load_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, DomainError> {
        self.campaigns
            .lock()
            .unwrap()
            .get(&campaign_id)
            .cloned()
            .ok_or(DomainError::CampaignNotFound(campaign_id))
    }

    async fn last_turn(&self, campaign_id: Uuid) -> Result<Option<i64>, DomainError> {
        Ok(Self::last_turn_of(&self.log.lock().unwrap(), campaign_id))
    }

    async fn load_events(&self, campaign_id: Uuid) -> Result<Vec<TurnEvent>, DomainError> {
        self.load_events_after(campaign_id, i64::MIN).await
    }

    async fn load_events_after(
        &self,
        campaign_id: Uuid,
        after_turn: i64,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        let mut events: Vec<TurnEvent> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.campaign_id == campaign_id && e.turn_number > after_turn)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.turn_number, e.sequence));
        Ok(events)
    }

    async fn append_event(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        event: NewTurnEvent,
    ) -> Result<Uuid, DomainError> {
        let mut log = self.log.lock().unwrap();
        check_turn_order(
            campaign_id,
            Self::last_turn_of(&log, campaign_id),
            turn_number,
            true,
        )?;
        let sequence = Self::next_sequence(&log, campaign_id, turn_number);
        let stored = event.into_stored(campaign_id, turn_number, sequence);
        let event_id = stored.event_id;
        log.push(stored.clone());
        self.appended
            .lock()
            .unwrap()
            .push((campaign_id, turn_number, vec![stored]));
        Ok(event_id)
    }

    async fn append_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        events: Vec<NewTurnEvent>,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        let mut log = self.log.lock().unwrap();
        check_turn_order(
            campaign_id,
            Self::last_turn_of(&log, campaign_id),
            turn_number,
            false,
        )?;
        let stored: Vec<TurnEvent> = events
            .into_iter()
            .zip(0..)
            .map(|(event, sequence)| event.into_stored(campaign_id, turn_number, sequence))
            .collect();
        log.extend(stored.iter().cloned());
        self.appended
            .lock()
            .unwrap()
            .push((campaign_id, turn_number, stored.clone()));
        Ok(stored)
    }

    async fn cache_rendered_turn(&self, turn: &RenderedTurn) -> Result<(), DomainError> {
        let mut rendered = self.rendered.lock().unwrap();
        if !rendered
            .iter()
            .any(|r| r.campaign_id == turn.campaign_id && r.turn_number == turn.turn_number)
        {
            rendered.push(turn.clone());
        }
        Ok(())
    }

    async fn load_rendered_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError> {
        Ok(self
            .rendered
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.campaign_id == campaign_id && r.turn_number == turn_number)
            .cloned())
    }
}

/// An event repository that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn create_campaign(&self, _campaign: &CampaignRecord) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn load_campaign(&self, _campaign_id: Uuid) -> Result<CampaignRecord, DomainError> {
        Err(refused())
    }

    async fn last_turn(&self, _campaign_id: Uuid) -> Result<Option<i64>, DomainError> {
        Err(refused())
    }

    async fn load_events(&self, _campaign_id: Uuid) -> Result<Vec<TurnEvent>, DomainError> {
        Err(refused())
    }

    async fn load_events_after(
        &self,
        _campaign_id: Uuid,
        _after_turn: i64,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        Err(refused())
    }

    async fn append_event(
        &self,
        _campaign_id: Uuid,
        _turn_number: i64,
        _event: NewTurnEvent,
    ) -> Result<Uuid, DomainError> {
        Err(refused())
    }

    async fn append_turn(
        &self,
        _campaign_id: Uuid,
        _turn_number: i64,
        _events: Vec<NewTurnEvent>,
    ) -> Result<Vec<TurnEvent>, DomainError> {
        Err(refused())
    }

    async fn cache_rendered_turn(&self, _turn: &RenderedTurn) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn load_rendered_turn(
        &self,
        _campaign_id: Uuid,
        _turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError> {
        Err(refused())
    }
}
