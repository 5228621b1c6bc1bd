//! Shared application state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use talespin_content::{EraPack, KeywordRetriever};
use talespin_core::repository::EventRepository;
use talespin_event_store::memory_event_repository::{
    InMemoryEventRepository, InMemoryProjectionRepository,
};
use talespin_event_store::pg_event_repository::PgEventRepository;
use talespin_llm::disabled::DisabledBackend;
use talespin_llm::openai::OpenAiCompatibleClient;
use talespin_llm::{LlmPort, StructuredLlm};
use talespin_narrative::{Orchestrator, PipelineConfig};
use talespin_rules::MechanicsTuning;
use talespin_world_state::domain::repository::ProjectionRepository;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

/// One lock per campaign, so turns of the same campaign run one at a time
/// while different campaigns proceed concurrently.
#[derive(Debug, Default)]
pub struct TurnLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    /// The lock guarding `campaign_id`.
    ///
    /// Locks no request holds are dropped on the way, so the map only keeps
    /// campaigns with a turn in flight.
    pub fn for_campaign(&self, campaign_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(campaign_id).or_default().clone()
    }

    /// Number of campaigns currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no campaign is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The turn pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Per-campaign turn serialization.
    pub turn_locks: Arc<TurnLocks>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            turn_locks: Arc::new(TurnLocks::default()),
        }
    }

    /// Wires storage, content, tuning and the LLM backend from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the database, a configuration file or the
    /// pipeline configuration is unusable.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let (events, projections): (Arc<dyn EventRepository>, Arc<dyn ProjectionRepository>) =
            match &config.database_url {
                Some(url) => {
                    let pool = talespin_event_store::connect(url).await?;
                    talespin_event_store::run_migrations(&pool).await?;
                    info!("using PostgreSQL event store");
                    let store = Arc::new(PgEventRepository::new(pool));
                    (store.clone(), store)
                }
                None => {
                    warn!("DATABASE_URL not set; campaigns live in memory and vanish on restart");
                    (
                        Arc::new(InMemoryEventRepository::new()),
                        Arc::new(InMemoryProjectionRepository::new()),
                    )
                }
            };

        let backend: Arc<dyn LlmPort> = if config.llm.uses_http() {
            info!(base_url = %config.llm.base_url, "using OpenAI-compatible LLM backend");
            Arc::new(OpenAiCompatibleClient::from_config(&config.llm))
        } else {
            warn!("no LLM backend configured; every stage uses its fallback");
            Arc::new(DisabledBackend)
        };
        let llm = StructuredLlm::new(backend, Arc::new(config.llm.clone()));

        let mut pipeline = PipelineConfig::default();
        if let Some(count) = config.suggestion_count {
            pipeline.suggestion_count = count;
        }
        let mut builder = Orchestrator::builder(events, projections, llm).config(pipeline);

        if let Some(path) = &config.tuning_path {
            let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Config(format!("cannot read tuning {}: {e}", path.display()))
            })?;
            builder = builder.tuning(MechanicsTuning::from_yaml_str(&yaml)?);
        }
        if let Some(path) = &config.content_path {
            let pack = EraPack::load(path)?;
            let retriever = KeywordRetriever::new(pack.lore().to_vec());
            builder = builder
                .retriever(Arc::new(retriever))
                .content(Arc::new(pack));
        }

        Ok(Self::new(Arc::new(builder.build()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_campaign_shares_a_lock() {
        let locks = TurnLocks::default();
        let campaign_id = Uuid::new_v4();

        let first = locks.for_campaign(campaign_id);
        let second = locks.for_campaign(campaign_id);
        let other = locks.for_campaign(Uuid::new_v4());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_released_locks_are_pruned() {
        let locks = TurnLocks::default();
        let held = locks.for_campaign(Uuid::new_v4());
        for _ in 0..10 {
            drop(locks.for_campaign(Uuid::new_v4()));
        }

        let again = locks.for_campaign(Uuid::new_v4());

        assert_eq!(locks.len(), 2);
        drop((held, again));
        drop(locks.for_campaign(Uuid::new_v4()));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_default_config_builds_in_memory_state() {
        let config = AppConfig::from_lookup(|_| None).unwrap();

        let state = AppState::from_config(&config).await.unwrap();

        assert_eq!(state.orchestrator.config().suggestion_count, 4);
    }
}
