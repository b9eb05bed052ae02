// Dining Table - concurrent dining philosophers harness
// Deadlock-free fork acquisition by resource ordering, with fairness experiments

// Module declarations
pub mod config;
pub mod error;
pub mod fork;
pub mod philosopher;
pub mod scenario;
pub mod strategy;
pub mod table;
pub mod telemetry;

// Re-exports for convenience
pub use config::{FairnessConfig, HarnessConfig, TableConfig};
pub use error::{ErrorCode, TableError, TableErrorCodes};
pub use fork::{DefaultFork, DelayedFork, Fork, ForkId};
pub use philosopher::{HeldFork, HungerStrategy, Philosopher, PhilosopherId, Seat, WorkerPhase};
pub use scenario::{Scenario, ScenarioVerdict};
pub use strategy::{DelayPlan, DelayRule, OrderedStrategy};
pub use table::{DiningTable, RunBound, RunReport, StopSignal, TableBuilder};
pub use telemetry::{EventCollector, EventSink, ProtocolMonitor, TableEvent};

/// Install a stderr `tracing` subscriber at the given level.
///
/// `log` records from the library are bridged through the subscriber.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(level: tracing::Level) {
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        log::debug!("[Logging] tracing subscriber installed at {}", level);
    }
}
