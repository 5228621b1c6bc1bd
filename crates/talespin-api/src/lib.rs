//! Talespin: HTTP host for the narrative engine.
//!
//! A thin axum layer over [`talespin_narrative::Orchestrator`]: campaign
//! setup, state reads, turns and rendered-turn lookups.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// The application router, without transport layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::campaigns::router())
        .with_state(state)
}
