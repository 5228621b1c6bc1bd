//! The commit step: the only write path of a turn.
//!
//! All events of a turn are appended atomically. Once the append succeeds
//! the turn is committed; projection and render-cache writes that follow are
//! best-effort and degrade to warnings.

use std::sync::Arc;

use talespin_core::clock::SharedClock;
use talespin_core::error::DomainError;
use talespin_core::event::{DomainEvent, NewTurnEvent, TurnEvent};
use talespin_core::repository::{EventRepository, RenderedTurn};
use talespin_core::warnings::{WarningCode, Warnings};
use talespin_world_state::application::command_handlers::apply_projection;
use talespin_world_state::domain::events::GameEvent;
use talespin_world_state::domain::projection::CampaignProjection;
use talespin_world_state::domain::repository::ProjectionRepository;
use tracing::{info, warn};
use uuid::Uuid;

const SOURCE: &str = "commit";

/// Everything a turn wants persisted.
#[derive(Debug, Clone)]
pub struct CommitPlan {
    pub campaign_id: Uuid,
    pub turn_number: i64,
    /// The projection the turn was computed against.
    pub base: CampaignProjection,
    /// Events in append order.
    pub events: Vec<GameEvent>,
    pub text: String,
    pub citations: Vec<String>,
    pub suggested_actions: Vec<String>,
}

/// The outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// The appended events with their assigned identity.
    pub stored: Vec<TurnEvent>,
    /// The projection after the turn.
    pub projection: CampaignProjection,
    /// Post-commit degradation.
    pub warnings: Warnings,
}

/// Holds the storage handles. No stage can reach them.
pub struct CommitStage {
    events: Arc<dyn EventRepository>,
    projections: Arc<dyn ProjectionRepository>,
    clock: SharedClock,
}

impl CommitStage {
    #[must_use]
    pub fn new(
        events: Arc<dyn EventRepository>,
        projections: Arc<dyn ProjectionRepository>,
        clock: SharedClock,
    ) -> Self {
        Self {
            events,
            projections,
            clock,
        }
    }

    /// Commits on a spawned task and waits for it, so a caller that goes away
    /// mid-commit cannot leave the turn half written.
    ///
    /// # Errors
    ///
    /// Returns the append error, or `DomainError::Infrastructure` if the
    /// commit task panicked.
    pub async fn commit(self: Arc<Self>, plan: CommitPlan) -> Result<CommitReceipt, DomainError> {
        tokio::spawn(async move { self.write(plan).await })
            .await
            .map_err(|e| DomainError::Infrastructure(format!("commit task failed: {e}")))?
    }

    async fn write(&self, plan: CommitPlan) -> Result<CommitReceipt, DomainError> {
        let now = self.clock.now();
        let rows: Vec<NewTurnEvent> = plan.events.iter().map(|e| e.to_new_event(now)).collect();
        let stored = self
            .events
            .append_turn(plan.campaign_id, plan.turn_number, rows)
            .await?;
        info!(
            campaign_id = %plan.campaign_id,
            turn_number = plan.turn_number,
            events = stored.len(),
            "turn committed"
        );

        let mut warnings = Warnings::new();
        let projection = apply_projection(plan.campaign_id, Some(plan.base), &stored)?;
        if let Err(e) = self.projections.save_projection(&projection).await {
            warn!(campaign_id = %plan.campaign_id, error = %e, "projection save deferred");
            warnings.push(
                SOURCE,
                WarningCode::ProjectionDeferred,
                format!("projection will be rebuilt from the log on next read: {e}"),
            );
        }

        let rendered = RenderedTurn {
            id: Uuid::now_v7(),
            campaign_id: plan.campaign_id,
            turn_number: plan.turn_number,
            text: plan.text,
            citations: plan.citations,
            suggested_actions: plan.suggested_actions,
            created_at: now,
        };
        if let Err(e) = self.events.cache_rendered_turn(&rendered).await {
            warn!(campaign_id = %plan.campaign_id, error = %e, "render cache write failed");
            warnings.push(
                SOURCE,
                WarningCode::RenderCacheFailed,
                format!("narration is still available from the log: {e}"),
            );
        }

        Ok(CommitReceipt {
            stored,
            projection,
            warnings,
        })
    }
}
