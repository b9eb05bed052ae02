//! Event sinks for table runs.
//!
//! Every synchronization point (acquire attempt, acquire success, release,
//! meal) is published to a single [`EventSink`] chosen at table construction.
//! Production runs use [`NoopSink`]; the harness picks a sink per need:
//! - [`TracingSink`] writes structured `tracing` events
//! - [`EventCollector`] keeps a bounded history plus a broadcast stream
//! - [`ProtocolMonitor`] checks mutual exclusion and meal accounting live

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::fork::ForkId;
use crate::philosopher::PhilosopherId;

pub mod events;

pub use events::{ProtocolViolation, TableEvent};

/// Receiver for table events. Called from worker threads concurrently.
pub trait EventSink: Send + Sync {
    fn record(&self, event: TableEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    #[inline]
    fn record(&self, _event: TableEvent) {}
}

/// Emits every event as a `tracing` event at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: TableEvent) {
        match event {
            TableEvent::WorkerStarted { philosopher } => {
                tracing::trace!(philosopher = philosopher.0, "worker started")
            }
            TableEvent::AcquireAttempt { philosopher, fork } => {
                tracing::trace!(philosopher = philosopher.0, fork = fork.0, "trying to acquire")
            }
            TableEvent::Acquired { philosopher, fork } => {
                tracing::trace!(philosopher = philosopher.0, fork = fork.0, "acquired")
            }
            TableEvent::Released { philosopher, fork } => {
                tracing::trace!(philosopher = philosopher.0, fork = fork.0, "released")
            }
            TableEvent::Ate { philosopher, meals, .. } => {
                tracing::trace!(philosopher = philosopher.0, meals, "ate")
            }
            TableEvent::WorkerStopped { philosopher, meals } => {
                tracing::trace!(philosopher = philosopher.0, meals, "worker stopped")
            }
        }
    }
}

/// Fans one event out to several sinks.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for SinkSet {
    fn record(&self, event: TableEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub recent: Vec<TableEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of events.
pub struct EventCollector {
    tx: broadcast::Sender<TableEvent>,
    history: Mutex<VecDeque<TableEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl EventCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: TableEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.history_capacity > 0 {
            if let Ok(mut history) = self.history.lock() {
                if history.len() == self.history_capacity {
                    history.pop_front();
                    self.dropped_history.fetch_add(1, Ordering::Relaxed);
                }
                history.push_back(event);
            }
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> EventSnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().copied().collect())
            .unwrap_or_default();
        EventSnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new(1024, 256)
    }
}

impl EventSink for EventCollector {
    fn record(&self, event: TableEvent) {
        self.publish(event);
    }
}

/// Per-philosopher tallies built from an event stream.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatTally {
    pub attempts: u64,
    pub acquisitions: u64,
    pub releases: u64,
    pub meals: u64,
}

/// Folds events into per-philosopher tallies.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub total_events: u64,
    pub lagged_events: u64,
    pub seats: BTreeMap<usize, SeatTally>,
}

impl EventSummary {
    pub fn record(&mut self, event: &TableEvent) {
        self.total_events += 1;
        let tally = self.seats.entry(event.philosopher().0).or_default();
        match *event {
            TableEvent::AcquireAttempt { .. } => tally.attempts += 1,
            TableEvent::Acquired { .. } => tally.acquisitions += 1,
            TableEvent::Released { .. } => tally.releases += 1,
            TableEvent::Ate { meals, .. } => tally.meals = tally.meals.max(meals),
            TableEvent::WorkerStarted { .. } | TableEvent::WorkerStopped { .. } => {}
        }
    }

    pub fn lagged(&mut self, skipped: u64) {
        self.lagged_events += skipped;
    }

    /// Drain everything currently buffered in a broadcast receiver.
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<TableEvent>) {
        use broadcast::error::TryRecvError;
        loop {
            match rx.try_recv() {
                Ok(event) => self.record(&event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

#[derive(Default)]
struct MonitorState {
    holders: HashMap<ForkId, PhilosopherId>,
    meals: HashMap<PhilosopherId, u64>,
    violations: Vec<ProtocolViolation>,
    checked: u64,
}

/// Live checker for mutual exclusion and meal accounting.
///
/// Relies on `Acquired` being published after the fork is held and
/// `Released` before it is freed.
#[derive(Default)]
pub struct ProtocolMonitor {
    state: Mutex<MonitorState>,
}

impl ProtocolMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> Vec<ProtocolViolation> {
        self.state
            .lock()
            .map(|state| state.violations.clone())
            .unwrap_or_default()
    }

    /// Number of events inspected so far.
    pub fn checked_events(&self) -> u64 {
        self.state.lock().map(|state| state.checked).unwrap_or(0)
    }

    /// Meal count last observed for `philosopher`.
    pub fn observed_meals(&self, philosopher: PhilosopherId) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.meals.get(&philosopher).copied())
            .unwrap_or(0)
    }
}

impl EventSink for ProtocolMonitor {
    fn record(&self, event: TableEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.checked += 1;
        match event {
            TableEvent::Acquired { philosopher, fork } => {
                if let Some(holder) = state.holders.insert(fork, philosopher) {
                    state.violations.push(ProtocolViolation::DoubleHold {
                        fork,
                        holder,
                        intruder: philosopher,
                    });
                }
            }
            TableEvent::Released { philosopher, fork } => {
                if state.holders.get(&fork) != Some(&philosopher) {
                    state
                        .violations
                        .push(ProtocolViolation::ForeignRelease { fork, philosopher });
                } else {
                    state.holders.remove(&fork);
                }
            }
            TableEvent::Ate {
                philosopher,
                meals,
                forks,
            } => {
                for fork in forks {
                    if state.holders.get(&fork) != Some(&philosopher) {
                        state
                            .violations
                            .push(ProtocolViolation::MealWithoutFork { fork, philosopher });
                    }
                }
                let expected = state.meals.get(&philosopher).copied().unwrap_or(0) + 1;
                if meals != expected {
                    state.violations.push(ProtocolViolation::MealCountJump {
                        philosopher,
                        expected,
                        observed: meals,
                    });
                }
                state.meals.insert(philosopher, meals);
            }
            TableEvent::WorkerStarted { .. }
            | TableEvent::AcquireAttempt { .. }
            | TableEvent::WorkerStopped { .. } => {}
        }
    }
}
