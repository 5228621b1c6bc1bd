//! Domain layer for the Narrative context.

pub mod meta;
pub mod route;
pub mod suggestions;
pub mod turn_state;
