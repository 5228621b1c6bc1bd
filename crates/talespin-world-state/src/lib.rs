//! Talespin: World State bounded context.
//!
//! Owns the typed game events that make up a campaign's history and the
//! projection engine that folds them into the current-state tables:
//! characters, inventory, quests and the campaign world-state blob.

pub mod application;
pub mod domain;
