//! DiningTable - ring orchestration, bounded runs and meal statistics.
//!
//! A table owns N forks and N philosophers arranged in a ring: philosopher
//! `i` sits between fork `i` (left) and fork `(i + 1) % N` (right). Both are
//! created through factory closures, called exactly N times each in ring
//! order, so identities always equal ring positions.
//!
//! `run` spawns one OS thread per philosopher. Workers start together behind
//! a gate and loop over hunger cycles until the bound is reached. The stop
//! signal is only observed between cycles, and guards release any held fork
//! on every exit path, so a stopped worker never holds a fork.
//!
//! Statistics are readable once `run` has returned. Tables are single-use.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{log_table_error, TableError};
use crate::fork::{DefaultFork, Fork, ForkId};
use crate::philosopher::{Philosopher, PhilosopherId, WorkerPhase};
use crate::telemetry::{EventSink, NoopSink, TableEvent};

/// Smallest table with contention.
pub const MIN_SEATS: usize = 2;

/// Default time workers get to stop after the bound is reached.
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(2);

const JOIN_POLL: Duration = Duration::from_millis(1);

const STATE_READY: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_FINISHED: u8 = 2;

#[derive(Debug, Default)]
struct Latch {
    flag: AtomicBool,
    lock: Mutex<()>,
    opened: Condvar,
}

impl Latch {
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.guard();
        self.opened.notify_all();
    }

    fn is_open(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn wait(&self) {
        let mut guard = self.guard();
        while !self.is_open() {
            guard = self
                .opened
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut guard = self.guard();
        while !self.is_open() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .opened
                .wait_timeout(guard, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }
}

/// Cloneable cancellation flag shared between the caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    latch: Arc<Latch>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every worker to stop after its current cycle.
    pub fn stop(&self) {
        self.latch.open();
    }

    pub fn is_stopped(&self) -> bool {
        self.latch.is_open()
    }

    /// Block until stopped or `timeout` elapsed. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }
}

/// How long a run lasts.
#[derive(Debug, Clone)]
pub enum RunBound {
    /// Wall-clock duration
    For(Duration),
    /// Hunger cycles per philosopher. No stall detection unless a worker fails.
    Cycles(u64),
    /// Until the caller stops the signal
    Until(StopSignal),
}

/// Post-run statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub seats: usize,
    pub elapsed_ms: u64,
    pub meals: Vec<u64>,
    pub min_meals: u64,
    pub max_meals: u64,
    pub total_meals: u64,
    /// `max / min`, absent when someone never ate
    pub fairness_ratio: Option<f64>,
}

impl RunReport {
    fn from_meals(meals: Vec<u64>, elapsed: Duration) -> Self {
        let min_meals = meals.iter().copied().min().unwrap_or(0);
        let max_meals = meals.iter().copied().max().unwrap_or(0);
        let fairness_ratio = if min_meals == 0 {
            None
        } else {
            Some(max_meals as f64 / min_meals as f64)
        };
        Self {
            seats: meals.len(),
            elapsed_ms: elapsed.as_millis() as u64,
            total_meals: meals.iter().sum(),
            meals,
            min_meals,
            max_meals,
            fairness_ratio,
        }
    }

    /// True when `max_meals >= ratio * min_meals`.
    pub fn ratio_reached(&self, ratio: f64) -> bool {
        self.max_meals as f64 >= ratio * self.min_meals as f64
    }
}

type ForkFactory = Box<dyn FnMut(ForkId) -> Arc<dyn Fork>>;
type PhilosopherFactory = Box<dyn FnMut(PhilosopherId) -> Philosopher>;

/// Builder wiring fork/philosopher factories and the event sink.
///
/// # Example
/// ```ignore
/// let table = DiningTable::builder(5)
///     .philosophers(|id| Philosopher::with_strategy(id, Arc::new(OrderedStrategy::new(plan.clone()))))
///     .event_sink(Arc::new(TracingSink))
///     .build()?;
/// table.run(RunBound::For(Duration::from_secs(2)))?;
/// ```
pub struct TableBuilder {
    seats: usize,
    fork_factory: ForkFactory,
    philosopher_factory: PhilosopherFactory,
    sink: Arc<dyn EventSink>,
    join_grace: Duration,
}

impl TableBuilder {
    pub fn new(seats: usize) -> Self {
        Self {
            seats,
            fork_factory: Box::new(|id| Arc::new(DefaultFork::new(id))),
            philosopher_factory: Box::new(Philosopher::new),
            sink: Arc::new(NoopSink),
            join_grace: DEFAULT_JOIN_GRACE,
        }
    }

    /// Replace the fork factory. Called once per seat with ids `0..N`.
    pub fn forks<F>(mut self, factory: F) -> Self
    where
        F: FnMut(ForkId) -> Arc<dyn Fork> + 'static,
    {
        self.fork_factory = Box::new(factory);
        self
    }

    /// Replace the philosopher factory. Called once per seat with ids `0..N`.
    pub fn philosophers<F>(mut self, factory: F) -> Self
    where
        F: FnMut(PhilosopherId) -> Philosopher + 'static,
    {
        self.philosopher_factory = Box::new(factory);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Time workers get to stop once the run bound is reached.
    pub fn join_grace(mut self, grace: Duration) -> Self {
        self.join_grace = grace;
        self
    }

    pub fn build(mut self) -> Result<DiningTable, TableError> {
        if self.seats < MIN_SEATS {
            return Err(TableError::InvalidSeatCount { seats: self.seats });
        }

        let mut forks = Vec::with_capacity(self.seats);
        for index in 0..self.seats {
            let fork = (self.fork_factory)(ForkId(index));
            if fork.id() != ForkId(index) {
                return Err(TableError::IdentityMismatch {
                    expected: index,
                    actual: fork.id().0,
                });
            }
            forks.push(fork);
        }

        let mut philosophers = Vec::with_capacity(self.seats);
        for index in 0..self.seats {
            let mut philosopher = (self.philosopher_factory)(PhilosopherId(index));
            if philosopher.id() != PhilosopherId(index) {
                return Err(TableError::IdentityMismatch {
                    expected: index,
                    actual: philosopher.id().0,
                });
            }
            philosopher.attach_sink(Arc::clone(&self.sink));
            philosophers.push(Arc::new(philosopher));
        }

        log::debug!("[Table] Built table with {} seats", self.seats);

        Ok(DiningTable {
            forks,
            philosophers,
            join_grace: self.join_grace,
            state: AtomicU8::new(STATE_READY),
            elapsed: Mutex::new(None),
        })
    }
}

/// Ring of forks and philosophers driven by one worker thread per seat.
pub struct DiningTable {
    forks: Vec<Arc<dyn Fork>>,
    philosophers: Vec<Arc<Philosopher>>,
    join_grace: Duration,
    state: AtomicU8,
    elapsed: Mutex<Option<Duration>>,
}

impl DiningTable {
    /// Table with default forks and resource-hierarchy philosophers.
    pub fn new(seats: usize) -> Result<Self, TableError> {
        TableBuilder::new(seats).build()
    }

    pub fn builder(seats: usize) -> TableBuilder {
        TableBuilder::new(seats)
    }

    pub fn seats(&self) -> usize {
        self.philosophers.len()
    }

    pub fn philosopher(&self, id: PhilosopherId) -> Option<&Arc<Philosopher>> {
        self.philosophers.get(id.0)
    }

    pub fn fork(&self, id: ForkId) -> Option<&Arc<dyn Fork>> {
        self.forks.get(id.0)
    }

    /// `(left, right)` fork ids for a seat.
    pub fn forks_of(&self, id: PhilosopherId) -> (ForkId, ForkId) {
        let n = self.seats();
        (ForkId(id.0 % n), ForkId((id.0 + 1) % n))
    }

    /// Current worker phase of every philosopher, in ring order.
    pub fn phases(&self) -> Vec<WorkerPhase> {
        self.philosophers.iter().map(|p| p.phase()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Run all workers until `bound` is reached and every worker stopped.
    ///
    /// # Errors
    /// - `AlreadyRan` if the table was run before
    /// - `WorkerFailed` if a strategy returned an error (all workers are stopped)
    /// - `WorkerPanicked` if a worker thread panicked
    /// - `StalledWorkers` if workers did not stop within the join grace; the
    ///   table then stays in the running state
    pub fn run(&self, bound: RunBound) -> Result<(), TableError> {
        if self
            .state
            .compare_exchange(STATE_READY, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TableError::AlreadyRan);
        }

        let stop = match &bound {
            RunBound::Until(signal) => signal.clone(),
            _ => StopSignal::new(),
        };
        let cycles = match bound {
            RunBound::Cycles(cycles) => Some(cycles),
            _ => None,
        };
        let gate = Arc::new(Latch::default());
        let failure: Arc<Mutex<Option<TableError>>> = Arc::new(Mutex::new(None));

        let mut workers = Vec::with_capacity(self.seats());
        for index in 0..self.seats() {
            let spawned = self.spawn_worker(
                index,
                stop.clone(),
                Arc::clone(&gate),
                cycles,
                Arc::clone(&failure),
            );
            match spawned {
                Ok(handle) => workers.push((PhilosopherId(index), handle)),
                Err(err) => {
                    log_table_error(&err, "DiningTable::run");
                    stop.stop();
                    gate.open();
                    self.await_workers(workers, &stop)?;
                    self.finish(Duration::ZERO);
                    return Err(err);
                }
            }
        }

        let started = Instant::now();
        log::info!(
            "[Table] Run started: seats={}, bound={:?}",
            self.seats(),
            bound
        );
        gate.open();

        if let RunBound::For(duration) = bound {
            stop.wait_timeout(duration);
            stop.stop();
        }

        self.await_workers(workers, &stop)?;
        let elapsed = started.elapsed();
        self.finish(elapsed);
        log::info!(
            "[Table] Run finished after {:?}: meals={:?}",
            elapsed,
            self.collect_meals()
        );

        let failure = failure
            .lock()
            .map_err(|_| TableError::LockPoisoned {
                component: "run failure slot".to_string(),
            })?
            .take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_worker(
        &self,
        index: usize,
        stop: StopSignal,
        gate: Arc<Latch>,
        cycles: Option<u64>,
        failure: Arc<Mutex<Option<TableError>>>,
    ) -> Result<JoinHandle<()>, TableError> {
        let philosopher = Arc::clone(&self.philosophers[index]);
        let (left, right) = self.forks_of(philosopher.id());
        let left = Arc::clone(&self.forks[left.0]);
        let right = Arc::clone(&self.forks[right.0]);

        let handle = thread::Builder::new()
            .name(format!("philosopher-{}", index))
            .spawn(move || {
                let _span = tracing::debug_span!("philosopher", id = index).entered();
                let _stop_on_panic = StopOnPanic(stop.clone());
                gate.wait();

                let id = philosopher.id();
                philosopher.emit(TableEvent::WorkerStarted { philosopher: id });

                let mut completed = 0u64;
                while !stop.is_stopped() && cycles.map_or(true, |max| completed < max) {
                    if let Err(err) = philosopher.on_hungry(left.as_ref(), right.as_ref()) {
                        log_table_error(&err, "worker");
                        if let Ok(mut slot) = failure.lock() {
                            slot.get_or_insert(TableError::WorkerFailed {
                                philosopher: id,
                                error: Box::new(err),
                            });
                        }
                        stop.stop();
                        break;
                    }
                    completed += 1;
                }

                philosopher.set_phase(WorkerPhase::Stopping);
                philosopher.emit(TableEvent::WorkerStopped {
                    philosopher: id,
                    meals: philosopher.meals(),
                });
                philosopher.set_phase(WorkerPhase::Stopped);
                tracing::debug!(cycles = completed, meals = philosopher.meals(), "worker stopped");
            })?;
        Ok(handle)
    }

    /// Wait for all workers. The join grace starts once the stop signal fires.
    fn await_workers(
        &self,
        workers: Vec<(PhilosopherId, JoinHandle<()>)>,
        stop: &StopSignal,
    ) -> Result<(), TableError> {
        let mut grace_started = false;
        let mut deadline: Option<Instant> = None;
        while !workers.iter().all(|(_, handle)| handle.is_finished()) {
            if !grace_started && stop.is_stopped() {
                grace_started = true;
                // An unrepresentable deadline means wait without one.
                deadline = Instant::now().checked_add(self.join_grace);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let stalled: Vec<PhilosopherId> = workers
                    .iter()
                    .filter(|(_, handle)| !handle.is_finished())
                    .map(|(id, _)| *id)
                    .collect();
                let err = TableError::StalledWorkers {
                    philosophers: stalled,
                };
                log_table_error(&err, "DiningTable::run");
                return Err(err);
            }
            thread::sleep(JOIN_POLL);
        }

        let mut panicked = None;
        for (id, handle) in workers {
            if handle.join().is_err() {
                panicked.get_or_insert(id);
            }
        }
        match panicked {
            Some(philosopher) => {
                self.finish(Duration::ZERO);
                Err(TableError::WorkerPanicked { philosopher })
            }
            None => Ok(()),
        }
    }

    fn finish(&self, elapsed: Duration) {
        if let Ok(mut slot) = self.elapsed.lock() {
            slot.get_or_insert(elapsed);
        }
        self.state.store(STATE_FINISHED, Ordering::SeqCst);
    }

    fn collect_meals(&self) -> Vec<u64> {
        self.philosophers.iter().map(|p| p.meals()).collect()
    }

    fn ensure_stopped(&self) -> Result<(), TableError> {
        if self.is_running() {
            return Err(TableError::RunInProgress);
        }
        Ok(())
    }

    /// Meal count per philosopher, in ring order.
    pub fn meals(&self) -> Result<Vec<u64>, TableError> {
        self.ensure_stopped()?;
        Ok(self.collect_meals())
    }

    pub fn min_meals(&self) -> Result<u64, TableError> {
        Ok(self.meals()?.into_iter().min().unwrap_or(0))
    }

    pub fn max_meals(&self) -> Result<u64, TableError> {
        Ok(self.meals()?.into_iter().max().unwrap_or(0))
    }

    pub fn report(&self) -> Result<RunReport, TableError> {
        let meals = self.meals()?;
        let elapsed = self
            .elapsed
            .lock()
            .map_err(|_| TableError::LockPoisoned {
                component: "run elapsed".to_string(),
            })?
            .unwrap_or_default();
        Ok(RunReport::from_meals(meals, elapsed))
    }
}

/// Stops the whole run when a worker unwinds.
struct StopOnPanic(StopSignal);

impl Drop for StopOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.stop();
        }
    }
}
