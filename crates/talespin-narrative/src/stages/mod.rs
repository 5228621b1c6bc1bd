//! Pipeline stages.
//!
//! A stage reads the shared [`TurnState`], writes only the fields it owns,
//! records degradation as warnings and hands the state on. Stages receive a
//! [`StageContext`], which has no path to durable storage.

pub mod arc_planner;
pub mod companion;
pub mod director;
pub mod encounter;
pub mod mechanic;
pub mod narrator;
pub mod router;
pub mod scene_frame;
pub mod suggestions;
pub mod validator;
pub mod world_sim;

use std::sync::Arc;

use async_trait::async_trait;
use talespin_content::{ContentSource, LoreRetriever};
use talespin_core::error::DomainError;
use talespin_core::rng::RngSource;
use talespin_llm::StructuredLlm;
use talespin_rules::MechanicsTuning;

use crate::config::PipelineConfig;
use crate::domain::turn_state::{StageName, TurnState};

/// Read-only collaborators shared by every stage.
#[derive(Clone)]
pub struct StageContext {
    pub config: PipelineConfig,
    pub llm: StructuredLlm,
    pub content: Arc<dyn ContentSource>,
    pub retriever: Arc<dyn LoreRetriever>,
    pub rng: Arc<dyn RngSource>,
    pub tuning: Arc<MechanicsTuning>,
}

/// One step of the turn pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The stage's position in the topology.
    fn name(&self) -> StageName;

    /// Runs the stage.
    ///
    /// # Errors
    ///
    /// Only for fatal conditions (malformed mechanics input). Everything
    /// recoverable is a warning.
    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError>;
}

/// The opening of every system prompt.
pub(crate) fn preamble(ctx: &StageContext, turn: &TurnState) -> String {
    format!(
        "You assist the game master of a narrative role-playing game set in {}. Tone: {}.",
        turn.snapshot.campaign().time_period,
        ctx.content.tone()
    )
}
