//! Event types emitted at the synchronization points of a run.

use serde::{Deserialize, Serialize};

use crate::fork::ForkId;
use crate::philosopher::PhilosopherId;

/// Structured events published to the table's event sink.
///
/// `Acquired` is published after the fork is held and `Released` before it is
/// freed, so per fork the events of different workers never interleave.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TableEvent {
    WorkerStarted {
        philosopher: PhilosopherId,
    },
    AcquireAttempt {
        philosopher: PhilosopherId,
        fork: ForkId,
    },
    Acquired {
        philosopher: PhilosopherId,
        fork: ForkId,
    },
    Released {
        philosopher: PhilosopherId,
        fork: ForkId,
    },
    Ate {
        philosopher: PhilosopherId,
        meals: u64,
        forks: [ForkId; 2],
    },
    WorkerStopped {
        philosopher: PhilosopherId,
        meals: u64,
    },
}

impl TableEvent {
    pub fn philosopher(&self) -> PhilosopherId {
        match *self {
            TableEvent::WorkerStarted { philosopher }
            | TableEvent::AcquireAttempt { philosopher, .. }
            | TableEvent::Acquired { philosopher, .. }
            | TableEvent::Released { philosopher, .. }
            | TableEvent::Ate { philosopher, .. }
            | TableEvent::WorkerStopped { philosopher, .. } => philosopher,
        }
    }
}

/// Invariant breaches observed by [`super::ProtocolMonitor`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolViolation {
    /// A fork was reported acquired while another philosopher held it
    DoubleHold {
        fork: ForkId,
        holder: PhilosopherId,
        intruder: PhilosopherId,
    },
    /// A philosopher released a fork it was not recorded as holding
    ForeignRelease {
        fork: ForkId,
        philosopher: PhilosopherId,
    },
    /// A meal was counted while one of the forks was not held by the eater
    MealWithoutFork {
        fork: ForkId,
        philosopher: PhilosopherId,
    },
    /// Meal counter did not advance by exactly one
    MealCountJump {
        philosopher: PhilosopherId,
        expected: u64,
        observed: u64,
    },
}
