//! Domain layer for the Rules & Resolution context.

pub mod actions;
pub mod resolver;
pub mod tuning;
