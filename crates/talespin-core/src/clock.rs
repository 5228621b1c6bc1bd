//! Clock abstraction for determinism.
//!
//! Turn events, rendered turns and projections are timestamped through this
//! trait so tests and replays can pin wall-clock time.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// A clock shared between the orchestrator and its spawned commit task.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
