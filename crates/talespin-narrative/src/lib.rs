//! Talespin: Narrative Orchestration bounded context.
//!
//! A turn is routed, threaded through a fixed sequence of stages that each
//! extend an in-memory [`TurnState`], and finally committed. Stages get a
//! read-only [`StageContext`]; only the commit step holds the write path.

pub mod application;
pub mod config;
pub mod domain;
pub mod stages;

pub use application::commit::{CommitPlan, CommitReceipt, CommitStage};
pub use application::graph::StageGraph;
pub use application::orchestrator::{
    Orchestrator, OrchestratorBuilder, TurnDebug, TurnResult, TurnStreamEvent,
};
pub use config::PipelineConfig;
pub use domain::route::{RouteClass, RouteDecision};
pub use domain::turn_state::{StageName, TurnPhase, TurnState};
pub use stages::{Stage, StageContext};
