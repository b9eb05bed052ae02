// Table error types and constants

use crate::error::ErrorCode;
use crate::fork::ForkId;
use crate::philosopher::PhilosopherId;
use log::error;
use std::fmt;

/// Table error code constants
///
/// Single source of truth for the numeric codes reported by the CLI and
/// carried in run reports.
///
/// Error code range: 3001-3013
pub struct TableErrorCodes {}

impl TableErrorCodes {
    /// Table needs at least two seats
    pub const INVALID_SEAT_COUNT: i32 = 3001;

    /// Worker tried to pick up a fork it already holds
    pub const FORK_ALREADY_HELD: i32 = 3002;

    /// Worker tried to put down a fork it does not hold
    pub const FORK_NOT_HELD: i32 = 3003;

    /// Strategy ate with forks that do not belong to its seat
    pub const FOREIGN_FORK: i32 = 3004;

    /// Statistics read while workers are still running
    pub const RUN_IN_PROGRESS: i32 = 3005;

    /// Table already ran once
    pub const ALREADY_RAN: i32 = 3006;

    /// Worker thread panicked
    pub const WORKER_PANICKED: i32 = 3007;

    /// Workers did not stop within the join grace
    pub const STALLED_WORKERS: i32 = 3008;

    /// Strategy returned an error
    pub const WORKER_FAILED: i32 = 3009;

    /// Mutex was poisoned
    pub const LOCK_POISONED: i32 = 3010;

    /// Harness configuration rejected
    pub const INVALID_CONFIG: i32 = 3011;

    /// Factory returned an entity with the wrong identity
    pub const IDENTITY_MISMATCH: i32 = 3012;

    /// Worker thread could not be spawned
    pub const WORKER_SPAWN: i32 = 3013;
}

/// Log a table error with structured context
///
/// Mirrors the fields carried by the error itself:
/// - error_code: Numeric error code for programmatic handling
/// - context: The operation that produced the error
/// - message: Human-readable error message
pub fn log_table_error(err: &TableError, context: &str) {
    error!(
        "Table error in {}: code={}, component=DiningTable, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by forks, philosophers and the table orchestrator
///
/// Protocol violations (`ForkAlreadyHeld`, `ForkNotHeld`, `ForeignFork`,
/// `RunInProgress`) are programming errors in a strategy or caller and are
/// never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    /// Fewer than two seats requested
    InvalidSeatCount { seats: usize },

    /// Re-entrant acquire by the holding worker
    ForkAlreadyHeld { fork: ForkId },

    /// Release by a worker that is not the holder
    ForkNotHeld { fork: ForkId },

    /// Meal attempted with forks outside the seat, or the same fork twice
    ForeignFork {
        philosopher: PhilosopherId,
        fork: ForkId,
    },

    /// Statistics requested before all workers stopped
    RunInProgress,

    /// Table is single-use
    AlreadyRan,

    /// Worker thread panicked
    WorkerPanicked { philosopher: PhilosopherId },

    /// Workers still running after the join grace expired
    StalledWorkers { philosophers: Vec<PhilosopherId> },

    /// Strategy of a philosopher returned an error
    WorkerFailed {
        philosopher: PhilosopherId,
        error: Box<TableError>,
    },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Harness configuration rejected
    InvalidConfig { reason: String },

    /// Factory returned an entity whose identity does not match its seat
    IdentityMismatch { expected: usize, actual: usize },

    /// Worker thread could not be spawned
    WorkerSpawn { reason: String },
}

impl ErrorCode for TableError {
    fn code(&self) -> i32 {
        match self {
            TableError::InvalidSeatCount { .. } => TableErrorCodes::INVALID_SEAT_COUNT,
            TableError::ForkAlreadyHeld { .. } => TableErrorCodes::FORK_ALREADY_HELD,
            TableError::ForkNotHeld { .. } => TableErrorCodes::FORK_NOT_HELD,
            TableError::ForeignFork { .. } => TableErrorCodes::FOREIGN_FORK,
            TableError::RunInProgress => TableErrorCodes::RUN_IN_PROGRESS,
            TableError::AlreadyRan => TableErrorCodes::ALREADY_RAN,
            TableError::WorkerPanicked { .. } => TableErrorCodes::WORKER_PANICKED,
            TableError::StalledWorkers { .. } => TableErrorCodes::STALLED_WORKERS,
            TableError::WorkerFailed { .. } => TableErrorCodes::WORKER_FAILED,
            TableError::LockPoisoned { .. } => TableErrorCodes::LOCK_POISONED,
            TableError::InvalidConfig { .. } => TableErrorCodes::INVALID_CONFIG,
            TableError::IdentityMismatch { .. } => TableErrorCodes::IDENTITY_MISMATCH,
            TableError::WorkerSpawn { .. } => TableErrorCodes::WORKER_SPAWN,
        }
    }

    fn message(&self) -> String {
        match self {
            TableError::InvalidSeatCount { seats } => {
                format!("Table needs at least 2 seats (got {})", seats)
            }
            TableError::ForkAlreadyHeld { fork } => {
                format!("Fork {} is already held by this worker", fork)
            }
            TableError::ForkNotHeld { fork } => {
                format!("Fork {} released by a worker that does not hold it", fork)
            }
            TableError::ForeignFork { philosopher, fork } => {
                format!(
                    "Philosopher {} tried to eat with fork {} which is not one of its two forks",
                    philosopher, fork
                )
            }
            TableError::RunInProgress => {
                "Workers still running. Wait for run() to return first.".to_string()
            }
            TableError::AlreadyRan => {
                "Table already ran. Build a fresh table per experiment.".to_string()
            }
            TableError::WorkerPanicked { philosopher } => {
                format!("Worker of philosopher {} panicked", philosopher)
            }
            TableError::StalledWorkers { philosophers } => {
                let ids: Vec<String> = philosophers.iter().map(|id| id.to_string()).collect();
                format!(
                    "Workers did not stop within the join grace (possible deadlock): [{}]",
                    ids.join(", ")
                )
            }
            TableError::WorkerFailed { philosopher, error } => {
                format!(
                    "Philosopher {} stopped on protocol violation: {}",
                    philosopher,
                    error.message()
                )
            }
            TableError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            TableError::InvalidConfig { reason } => {
                format!("Invalid harness configuration: {}", reason)
            }
            TableError::IdentityMismatch { expected, actual } => {
                format!(
                    "Factory returned identity {} for seat {}",
                    actual, expected
                )
            }
            TableError::WorkerSpawn { reason } => {
                format!("Failed to spawn worker thread: {}", reason)
            }
        }
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for TableError {}

impl From<std::io::Error> for TableError {
    fn from(err: std::io::Error) -> Self {
        TableError::WorkerSpawn {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_error_codes() {
        assert_eq!(
            TableError::InvalidSeatCount { seats: 1 }.code(),
            TableErrorCodes::INVALID_SEAT_COUNT
        );
        assert_eq!(
            TableError::ForkAlreadyHeld { fork: ForkId(0) }.code(),
            TableErrorCodes::FORK_ALREADY_HELD
        );
        assert_eq!(
            TableError::ForkNotHeld { fork: ForkId(0) }.code(),
            TableErrorCodes::FORK_NOT_HELD
        );
        assert_eq!(TableError::RunInProgress.code(), TableErrorCodes::RUN_IN_PROGRESS);
        assert_eq!(TableError::AlreadyRan.code(), TableErrorCodes::ALREADY_RAN);
        assert_eq!(
            TableError::StalledWorkers {
                philosophers: vec![PhilosopherId(1)]
            }
            .code(),
            3008
        );
        assert_eq!(
            TableError::WorkerSpawn {
                reason: "test".to_string()
            }
            .code(),
            3013
        );
    }

    #[test]
    fn test_table_error_messages() {
        let err = TableError::InvalidSeatCount { seats: 1 };
        assert_eq!(err.message(), "Table needs at least 2 seats (got 1)");

        let err = TableError::StalledWorkers {
            philosophers: vec![PhilosopherId(0), PhilosopherId(2)],
        };
        assert!(err.message().contains("[0, 2]"));

        let err = TableError::WorkerFailed {
            philosopher: PhilosopherId(3),
            error: Box::new(TableError::ForkNotHeld { fork: ForkId(4) }),
        };
        assert!(err.message().contains("Philosopher 3"));
        assert!(err.message().contains("Fork 4"));
    }

    #[test]
    fn test_table_error_display() {
        let err = TableError::AlreadyRan;
        let display = format!("{}", err);
        assert!(display.contains("TableError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("no threads left");
        let table_err: TableError = io_err.into();
        match table_err {
            TableError::WorkerSpawn { reason } => {
                assert!(reason.contains("no threads left"));
            }
            _ => panic!("Expected WorkerSpawn"),
        }
    }
}
