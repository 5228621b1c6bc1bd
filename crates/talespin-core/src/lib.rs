//! Talespin Core: shared domain abstractions.
//!
//! This crate defines the fundamental traits and types that all bounded
//! contexts depend on: the turn event log contract, deterministic time and
//! randomness, the domain error type and the warnings side-channel. It
//! contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod repository;
pub mod rng;
pub mod warnings;
