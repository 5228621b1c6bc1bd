//! Application layer for the Narrative context.

pub mod commit;
pub mod graph;
pub mod orchestrator;
