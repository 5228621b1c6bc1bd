//! Route modules.

pub mod campaigns;
pub mod health;
