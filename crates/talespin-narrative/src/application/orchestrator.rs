//! The turn orchestrator.
//!
//! One [`Orchestrator`] is built at startup and shared by every request. Each
//! call to [`Orchestrator::run_turn`] reads the last committed state, threads
//! a fresh [`TurnState`] through the compiled stage graph and commits the
//! result. Callers must serialize turns of the same campaign.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use talespin_content::{ContentSource, EmptyContent, LoreRetriever, NoRetrieval};
use talespin_core::clock::{SharedClock, SystemClock};
use talespin_core::error::DomainError;
use talespin_core::repository::{EventRepository, RenderedTurn};
use talespin_core::rng::{RngSource, SeededRngSource};
use talespin_core::warnings::Warning;
use talespin_llm::StructuredLlm;
use talespin_rules::{DiceRoll, MechanicsTuning};
use talespin_world_state::application::command_handlers::handle_create_campaign;
use talespin_world_state::application::query_handlers::{
    self, CharacterSheet, StateSnapshot, quest_log,
};
use talespin_world_state::domain::commands::CreateCampaign;
use talespin_world_state::domain::events::{
    GameEvent, MetaCommand, PlayerActed, TimeAdvanced, TurnNarrated,
};
use talespin_world_state::domain::projection::{CampaignProjection, InventoryItem, QuestEntry};
use talespin_world_state::domain::repository::ProjectionRepository;
use tokio::sync::mpsc;
use tracing::{Span, debug, instrument, warn};
use uuid::Uuid;

use super::commit::{CommitPlan, CommitStage};
use super::graph::StageGraph;
use crate::config::PipelineConfig;
use crate::domain::meta;
use crate::domain::route::{RouteClass, RouteDecision};
use crate::domain::suggestions;
use crate::domain::turn_state::{StageName, TurnPhase, TurnState};
use crate::stages::StageContext;
use crate::stages::suggestions::default_suggestions;

/// Diagnostics attached when the caller asks for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDebug {
    pub route: RouteDecision,
    /// Stages in execution order, router and commit included.
    pub stages: Vec<StageName>,
    pub roll: Option<DiceRoll>,
    pub validation_notes: Vec<String>,
    pub citations: Vec<String>,
    /// Type tags of the committed events, in log order.
    pub events: Vec<String>,
}

/// What a committed turn returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub campaign_id: Uuid,
    pub turn_number: i64,
    pub route: RouteClass,
    pub narrated_text: String,
    /// Exactly as many entries as the configured suggestion count.
    pub suggested_actions: Vec<String>,
    pub character_sheet: CharacterSheet,
    pub inventory: Vec<InventoryItem>,
    pub quest_log: Vec<QuestEntry>,
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<TurnDebug>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CampaignProjection>,
}

/// Progress of a streaming turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnStreamEvent {
    StageCompleted { stage: StageName },
    /// A sentence of validated narration.
    NarrationChunk { text: String },
    Committed { turn_number: i64 },
}

/// Runs turns against one set of collaborators.
pub struct Orchestrator {
    events: Arc<dyn EventRepository>,
    projections: Arc<dyn ProjectionRepository>,
    clock: SharedClock,
    ctx: StageContext,
    graph: StageGraph,
    commit: Arc<CommitStage>,
}

/// Assembles an [`Orchestrator`]. Only storage and the LLM wrapper are
/// required; everything else has a working default.
pub struct OrchestratorBuilder {
    events: Arc<dyn EventRepository>,
    projections: Arc<dyn ProjectionRepository>,
    llm: StructuredLlm,
    content: Arc<dyn ContentSource>,
    retriever: Arc<dyn LoreRetriever>,
    rng: Arc<dyn RngSource>,
    tuning: MechanicsTuning,
    config: PipelineConfig,
    clock: SharedClock,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn content(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn LoreRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    #[must_use]
    pub fn rng(mut self, rng: Arc<dyn RngSource>) -> Self {
        self.rng = rng;
        self
    }

    #[must_use]
    pub fn tuning(mut self, tuning: MechanicsTuning) -> Self {
        self.tuning = tuning;
        self
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and compiles the stage graph.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for inconsistent configuration or
    /// tuning.
    pub fn build(self) -> Result<Orchestrator, DomainError> {
        self.config.validate()?;
        self.tuning.validate()?;
        let graph = StageGraph::compile()?;
        let commit = Arc::new(CommitStage::new(
            self.events.clone(),
            self.projections.clone(),
            self.clock.clone(),
        ));
        Ok(Orchestrator {
            events: self.events,
            projections: self.projections,
            clock: self.clock,
            ctx: StageContext {
                config: self.config,
                llm: self.llm,
                content: self.content,
                retriever: self.retriever,
                rng: self.rng,
                tuning: Arc::new(self.tuning),
            },
            graph,
            commit,
        })
    }
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder(
        events: Arc<dyn EventRepository>,
        projections: Arc<dyn ProjectionRepository>,
        llm: StructuredLlm,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            events,
            projections,
            llm,
            content: Arc::new(EmptyContent),
            retriever: Arc::new(NoRetrieval),
            rng: Arc::new(SeededRngSource),
            tuning: MechanicsTuning::default(),
            config: PipelineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// The pipeline configuration in effect.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Sets up a new campaign at turn 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for malformed setups and storage
    /// errors otherwise.
    pub async fn create_campaign(
        &self,
        command: &CreateCampaign,
    ) -> Result<CampaignProjection, DomainError> {
        handle_create_campaign(
            command,
            self.clock.as_ref(),
            self.events.as_ref(),
            self.projections.as_ref(),
        )
        .await
    }

    /// The last committed state, seen from `player_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CampaignNotFound` or
    /// `DomainError::CharacterNotFound` for unknown ids.
    pub async fn state(
        &self,
        campaign_id: Uuid,
        player_id: Uuid,
    ) -> Result<StateSnapshot, DomainError> {
        query_handlers::read_state(
            campaign_id,
            player_id,
            self.events.as_ref(),
            self.projections.as_ref(),
        )
        .await
    }

    /// The narration of a committed turn.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn rendered_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError> {
        self.events.load_campaign(campaign_id).await?;
        query_handlers::rendered_turn(campaign_id, turn_number, self.events.as_ref()).await
    }

    /// Runs and commits one turn.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for blank input, lookup errors for
    /// unknown ids, `DomainError::InvalidAction` for malformed mechanics input
    /// and storage errors from the commit. Nothing is persisted on error.
    #[instrument(
        skip(self, user_input, debug_enabled),
        fields(debug = debug_enabled, turn_number = tracing::field::Empty)
    )]
    pub async fn run_turn(
        &self,
        campaign_id: Uuid,
        player_id: Uuid,
        user_input: &str,
        debug_enabled: bool,
        include_state: bool,
    ) -> Result<TurnResult, DomainError> {
        self.execute(campaign_id, player_id, user_input, debug_enabled, include_state, None)
            .await
    }

    /// Runs the same pipeline as [`Self::run_turn`], reporting progress on
    /// `sink`. Narration is only streamed once validated. A closed sink does
    /// not stop the turn.
    ///
    /// # Errors
    ///
    /// As [`Self::run_turn`].
    #[instrument(
        skip(self, user_input, sink, debug_enabled),
        fields(debug = debug_enabled, turn_number = tracing::field::Empty)
    )]
    pub async fn run_turn_streaming(
        &self,
        campaign_id: Uuid,
        player_id: Uuid,
        user_input: &str,
        debug_enabled: bool,
        include_state: bool,
        sink: mpsc::Sender<TurnStreamEvent>,
    ) -> Result<TurnResult, DomainError> {
        self.execute(campaign_id, player_id, user_input, debug_enabled, include_state, Some(&sink))
            .await
    }

    async fn execute(
        &self,
        campaign_id: Uuid,
        player_id: Uuid,
        user_input: &str,
        debug: bool,
        include_state: bool,
        sink: Option<&mpsc::Sender<TurnStreamEvent>>,
    ) -> Result<TurnResult, DomainError> {
        if user_input.trim().is_empty() {
            return Err(DomainError::Validation("user input must not be empty".into()));
        }
        let snapshot = self.state(campaign_id, player_id).await?;
        let mut turn = TurnState::new(snapshot, user_input.trim());
        Span::current().record("turn_number", turn.turn_number);

        let outcome = self.run_stages(&mut turn, sink).await;
        if let Err(e) = outcome {
            turn.phase = TurnPhase::Failed;
            warn!(stage = ?turn.trace.last(), error = %e, "turn failed before commit");
            return Err(e);
        }

        turn.phase = TurnPhase::CommitPending;
        let plan = commit_plan(&turn, &self.ctx.config);
        let receipt = match Arc::clone(&self.commit).commit(plan).await {
            Ok(receipt) => receipt,
            Err(e) => {
                turn.phase = TurnPhase::Failed;
                return Err(e);
            }
        };
        turn.phase = TurnPhase::Committed;
        turn.trace.push(StageName::Commit);
        for warning in receipt.warnings.into_vec() {
            turn.warnings.push(warning.source, warning.code, warning.message);
        }
        emit(sink, TurnStreamEvent::StageCompleted { stage: StageName::Commit }).await;
        emit(sink, TurnStreamEvent::Committed { turn_number: turn.turn_number }).await;

        let projection = receipt.projection;
        let character_sheet = projection
            .characters
            .get(&player_id)
            .map(CharacterSheet::from)
            .ok_or(DomainError::CharacterNotFound(player_id))?;
        let debug = debug.then(|| TurnDebug {
            route: turn
                .route
                .clone()
                .unwrap_or_else(|| RouteDecision::talk("not routed")),
            stages: turn.trace.clone(),
            roll: turn.mechanic.as_ref().map(|m| m.roll),
            validation_notes: turn.validation_notes.clone(),
            citations: turn.citations.clone(),
            events: receipt.stored.iter().map(|e| e.event_type.clone()).collect(),
        });

        Ok(TurnResult {
            campaign_id,
            turn_number: turn.turn_number,
            route: turn.route_class(),
            narrated_text: turn.narration,
            suggested_actions: turn.suggestions,
            character_sheet,
            inventory: projection.inventory_of(player_id).into_iter().cloned().collect(),
            quest_log: quest_log(&projection),
            warnings: turn.warnings.into_vec(),
            debug,
            state: include_state.then_some(projection),
        })
    }

    async fn run_stages(
        &self,
        turn: &mut TurnState,
        sink: Option<&mpsc::Sender<TurnStreamEvent>>,
    ) -> Result<(), DomainError> {
        let router = self.graph.router();
        turn.phase = TurnPhase::Running(StageName::Router);
        router.run(&self.ctx, turn).await?;
        turn.trace.push(StageName::Router);
        turn.phase = TurnPhase::Routed;
        emit(sink, TurnStreamEvent::StageCompleted { stage: StageName::Router }).await;

        let route = turn.route_class();
        if route == RouteClass::Meta {
            self.answer_meta(turn);
            stream_narration(sink, &turn.narration).await;
            return Ok(());
        }

        for stage in self.graph.path(route) {
            let name = stage.name();
            turn.phase = TurnPhase::Running(name);
            debug!(stage = %name, "stage started");
            stage.run(&self.ctx, turn).await?;
            turn.trace.push(name);
            emit(sink, TurnStreamEvent::StageCompleted { stage: name }).await;
            if name == StageName::NarrativeValidator {
                stream_narration(sink, &turn.narration).await;
            }
        }
        Ok(())
    }

    fn answer_meta(&self, turn: &mut TurnState) {
        let config = &self.ctx.config;
        let command = turn
            .route
            .as_ref()
            .and_then(|r| r.meta.clone())
            .unwrap_or(meta::MetaCommandKind::Help);
        turn.narration = meta::answer(&command, &turn.snapshot, config.campaign_start_hour);
        let defaults = default_suggestions(turn);
        let (suggested, _) = suggestions::normalize(Vec::new(), &defaults, config.suggestion_count);
        turn.suggestions = suggested;
    }
}

fn commit_plan(turn: &TurnState, config: &PipelineConfig) -> CommitPlan {
    let mut events = Vec::with_capacity(turn.pending_events.len() + 3);
    match turn.route.as_ref() {
        Some(RouteDecision {
            class: RouteClass::Meta,
            meta,
            ..
        }) => {
            events.push(GameEvent::MetaCommand(MetaCommand {
                player_id: turn.player_id,
                command: meta.as_ref().map_or("help", |m| m.name()).to_owned(),
            }));
        }
        decision => {
            events.push(GameEvent::PlayerActed(PlayerActed {
                player_id: turn.player_id,
                input: turn.user_input.clone(),
                route: turn.route_class().as_str().to_owned(),
                action_type: decision.and_then(RouteDecision::action_label),
            }));
            events.extend(turn.pending_events.iter().cloned());
            let minutes = if turn.mechanic.is_some() {
                turn.time_cost_minutes
            } else {
                config.talk_time_minutes
            };
            if minutes > 0 {
                events.push(GameEvent::TimeAdvanced(TimeAdvanced { minutes }));
            }
            events.push(GameEvent::TurnNarrated(TurnNarrated {
                text: turn.narration.clone(),
                citations: turn.citations.clone(),
                suggested_actions: turn.suggestions.clone(),
            }));
        }
    }
    CommitPlan {
        campaign_id: turn.campaign_id,
        turn_number: turn.turn_number,
        base: turn.snapshot.projection.clone(),
        events,
        text: turn.narration.clone(),
        citations: turn.citations.clone(),
        suggested_actions: turn.suggestions.clone(),
    }
}

async fn emit(sink: Option<&mpsc::Sender<TurnStreamEvent>>, event: TurnStreamEvent) {
    if let Some(sink) = sink {
        if sink.send(event).await.is_err() {
            debug!("stream receiver dropped");
        }
    }
}

async fn stream_narration(sink: Option<&mpsc::Sender<TurnStreamEvent>>, narration: &str) {
    if sink.is_none() {
        return;
    }
    for text in sentences(narration) {
        emit(sink, TurnStreamEvent::NarrationChunk { text }).await;
    }
}

/// Splits prose after sentence-ending punctuation, keeping the punctuation.
fn sentences(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && at_boundary {
            let chunk = current.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_owned());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        chunks.push(rest.to_owned());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences_keep_punctuation_and_tail() {
        let chunks = sentences("The lamp gutters. Who goes there?  Nobody answers");

        assert_eq!(chunks, ["The lamp gutters.", "Who goes there?", "Nobody answers"]);
    }

    #[test]
    fn test_sentences_ignore_inner_dots() {
        assert_eq!(sentences("It costs 3.5 credits."), ["It costs 3.5 credits."]);
    }
}
