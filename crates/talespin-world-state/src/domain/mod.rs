//! Domain layer for the World State context.

pub mod commands;
pub mod events;
pub mod projection;
pub mod repository;
