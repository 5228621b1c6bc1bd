//! Projection repository abstraction.
//!
//! Projections are derived data: they can be overwritten freely and rebuilt
//! from the event log at any time.

use async_trait::async_trait;
use talespin_core::error::DomainError;
use uuid::Uuid;

use super::projection::CampaignProjection;

/// Storage for materialized campaign projections.
#[async_trait]
pub trait ProjectionRepository: Send + Sync {
    /// Loads the stored projection, if one was saved.
    async fn load_projection(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignProjection>, DomainError>;

    /// Replaces the stored projection.
    async fn save_projection(&self, projection: &CampaignProjection) -> Result<(), DomainError>;
}
