//! Philosophers, their seats, and the hunger-strategy seam.
//!
//! A [`Philosopher`] owns an identity, an atomic meal counter and a
//! [`HungerStrategy`]. Each hunger cycle the worker hands the strategy a
//! [`Seat`]: the philosopher plus its two forks. Strategies pick forks up
//! through the seat, which returns [`HeldFork`] guards, and can only count a
//! meal by presenting two guards for the seat's two distinct forks. Guards
//! put their fork down on drop, so no exit path (error, panic) leaves a fork
//! held by a finished cycle.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{log_table_error, TableError};
use crate::fork::{Fork, ForkId};
use crate::strategy::OrderedStrategy;
use crate::telemetry::{EventSink, NoopSink, TableEvent};

/// Philosopher identity, equal to its ring position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PhilosopherId(pub usize);

impl fmt::Display for PhilosopherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker state machine.
///
/// `Thinking -> Hungry -> AcquiringFirst -> AcquiringSecond -> Eating ->
/// Releasing -> Thinking`, with `Stopping -> Stopped` reachable only from
/// `Thinking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerPhase {
    Thinking = 0,
    Hungry = 1,
    AcquiringFirst = 2,
    AcquiringSecond = 3,
    Eating = 4,
    Releasing = 5,
    Stopping = 6,
    Stopped = 7,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Thinking,
            1 => WorkerPhase::Hungry,
            2 => WorkerPhase::AcquiringFirst,
            3 => WorkerPhase::AcquiringSecond,
            4 => WorkerPhase::Eating,
            5 => WorkerPhase::Releasing,
            6 => WorkerPhase::Stopping,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Pluggable hunger response, invoked once per cycle by the owning worker.
///
/// Implementations that want deadlock freedom must route through
/// [`Seat::eat_ordered`] or otherwise pick up the lower fork id first.
pub trait HungerStrategy: Send + Sync {
    fn on_hungry(&self, seat: &Seat<'_>) -> Result<(), TableError>;
}

/// An actor competing for its two neighbouring forks.
///
/// Meals are counted only through [`Seat::eat`] and [`Seat::eat_for`]:
///
/// ```compile_fail
/// use dining_table::{Philosopher, PhilosopherId};
///
/// let philosopher = Philosopher::new(PhilosopherId(0));
/// philosopher.count_meal();
/// ```
pub struct Philosopher {
    id: PhilosopherId,
    meals: AtomicU64,
    phase: AtomicU8,
    strategy: Arc<dyn HungerStrategy>,
    sink: Arc<dyn EventSink>,
}

impl Philosopher {
    /// Philosopher using the resource hierarchy strategy with no delays.
    pub fn new(id: PhilosopherId) -> Self {
        Self::with_strategy(id, Arc::new(OrderedStrategy::default()))
    }

    pub fn with_strategy(id: PhilosopherId, strategy: Arc<dyn HungerStrategy>) -> Self {
        Self {
            id,
            meals: AtomicU64::new(0),
            phase: AtomicU8::new(WorkerPhase::Thinking as u8),
            strategy,
            sink: Arc::new(NoopSink),
        }
    }

    pub(crate) fn attach_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink;
    }

    pub fn id(&self) -> PhilosopherId {
        self.id
    }

    /// Current meal count. Safe to read while the worker runs.
    pub fn meals(&self) -> u64 {
        self.meals.load(Ordering::Acquire)
    }

    /// Increment the meal counter, returning the new count.
    ///
    /// Reached only through [`Seat::eat`], which checks both forks are held.
    pub(crate) fn count_meal(&self) -> u64 {
        self.meals.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn emit(&self, event: TableEvent) {
        self.sink.record(event);
    }

    /// Run one hunger cycle with the given neighbouring forks.
    pub fn on_hungry(&self, left: &dyn Fork, right: &dyn Fork) -> Result<(), TableError> {
        self.set_phase(WorkerPhase::Hungry);
        let seat = Seat {
            philosopher: self,
            left,
            right,
            held: Cell::new(0),
        };
        let result = self.strategy.on_hungry(&seat);
        self.set_phase(WorkerPhase::Thinking);
        result
    }
}

impl fmt::Debug for Philosopher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Philosopher")
            .field("id", &self.id)
            .field("meals", &self.meals())
            .field("phase", &self.phase())
            .finish()
    }
}

/// One philosopher and its two forks for the duration of a hunger cycle.
pub struct Seat<'a> {
    philosopher: &'a Philosopher,
    left: &'a dyn Fork,
    right: &'a dyn Fork,
    held: Cell<usize>,
}

impl<'a> Seat<'a> {
    pub fn philosopher(&self) -> &'a Philosopher {
        self.philosopher
    }

    pub fn id(&self) -> PhilosopherId {
        self.philosopher.id
    }

    pub fn left(&self) -> &'a dyn Fork {
        self.left
    }

    pub fn right(&self) -> &'a dyn Fork {
        self.right
    }

    /// The seat's forks as `(lower id, higher id)`, whatever their geometry.
    pub fn ordered(&self) -> (&'a dyn Fork, &'a dyn Fork) {
        if self.left.id() < self.right.id() {
            (self.left, self.right)
        } else {
            (self.right, self.left)
        }
    }

    fn owns(&self, fork: ForkId) -> bool {
        fork == self.left.id() || fork == self.right.id()
    }

    /// Block until `fork` is acquired. The guard puts it down when dropped.
    pub fn pick_up<'s>(&'s self, fork: &'s dyn Fork) -> Result<HeldFork<'s>, TableError> {
        let id = fork.id();
        if !self.owns(id) {
            return Err(TableError::ForeignFork {
                philosopher: self.id(),
                fork: id,
            });
        }

        let phase = if self.held.get() == 0 {
            WorkerPhase::AcquiringFirst
        } else {
            WorkerPhase::AcquiringSecond
        };
        self.philosopher.set_phase(phase);
        self.philosopher.emit(TableEvent::AcquireAttempt {
            philosopher: self.id(),
            fork: id,
        });

        fork.acquire()?;
        self.held.set(self.held.get() + 1);
        self.philosopher.emit(TableEvent::Acquired {
            philosopher: self.id(),
            fork: id,
        });

        Ok(HeldFork {
            seat: self,
            fork,
            released: false,
        })
    }

    /// Count one meal. Both guards must cover this seat's two distinct forks.
    pub fn eat(&self, first: &HeldFork<'_>, second: &HeldFork<'_>) -> Result<u64, TableError> {
        self.eat_for(first, second, Duration::ZERO)
    }

    /// Like [`Seat::eat`], but stays in `Eating` with both forks for `eating`
    /// before the meal is counted.
    pub fn eat_for(
        &self,
        first: &HeldFork<'_>,
        second: &HeldFork<'_>,
        eating: Duration,
    ) -> Result<u64, TableError> {
        let forks = self.claim_pair(first, second)?;
        self.philosopher.set_phase(WorkerPhase::Eating);
        pause(eating);

        let meals = self.philosopher.count_meal();
        self.philosopher.emit(TableEvent::Ate {
            philosopher: self.id(),
            meals,
            forks,
        });
        Ok(meals)
    }

    fn claim_pair(
        &self,
        first: &HeldFork<'_>,
        second: &HeldFork<'_>,
    ) -> Result<[ForkId; 2], TableError> {
        let (a, b) = (first.fork_id(), second.fork_id());
        for (guard, fork) in [(first, a), (second, b)] {
            if guard.seat.id() != self.id() || !self.owns(fork) {
                return Err(TableError::ForeignFork {
                    philosopher: self.id(),
                    fork,
                });
            }
        }
        if a == b {
            return Err(TableError::ForeignFork {
                philosopher: self.id(),
                fork: b,
            });
        }
        Ok([a, b])
    }

    /// Resource hierarchy skeleton: lower fork first, then the higher one,
    /// eat (holding both for `eating`), release higher then lower.
    pub fn eat_ordered(&self, eating: Duration) -> Result<u64, TableError> {
        let (low, high) = self.ordered();
        let low = self.pick_up(low)?;
        let high = self.pick_up(high)?;
        let meals = self.eat_for(&low, &high, eating)?;
        high.put_down()?;
        low.put_down()?;
        Ok(meals)
    }
}

/// Guard for a fork picked up through a [`Seat`].
pub struct HeldFork<'s> {
    seat: &'s Seat<'s>,
    fork: &'s dyn Fork,
    released: bool,
}

impl HeldFork<'_> {
    pub fn fork_id(&self) -> ForkId {
        self.fork.id()
    }

    /// Put the fork down, surfacing release errors.
    pub fn put_down(mut self) -> Result<(), TableError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), TableError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let seat = self.seat;
        seat.philosopher.set_phase(WorkerPhase::Releasing);
        seat.philosopher.emit(TableEvent::Released {
            philosopher: seat.id(),
            fork: self.fork.id(),
        });
        let result = self.fork.release();
        let remaining = seat.held.get().saturating_sub(1);
        seat.held.set(remaining);
        if remaining == 0 {
            seat.philosopher.set_phase(WorkerPhase::Thinking);
        }
        result
    }
}

impl Drop for HeldFork<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log_table_error(&err, "HeldFork::drop");
        }
    }
}

/// Sleep unless `delay` is zero.
pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::DefaultFork;
    use crate::telemetry::ProtocolMonitor;

    struct PickLeftOnly;

    impl HungerStrategy for PickLeftOnly {
        fn on_hungry(&self, seat: &Seat<'_>) -> Result<(), TableError> {
            let left = seat.pick_up(seat.left())?;
            seat.eat(&left, &left)?;
            Ok(())
        }
    }

    struct FailAfterFirst;

    impl HungerStrategy for FailAfterFirst {
        fn on_hungry(&self, seat: &Seat<'_>) -> Result<(), TableError> {
            let (low, _) = seat.ordered();
            let _held = seat.pick_up(low)?;
            Err(TableError::ForkNotHeld { fork: low.id() })
        }
    }

    #[test]
    fn test_default_strategy_counts_one_meal_per_cycle() {
        let philosopher = Philosopher::new(PhilosopherId(1));
        let left = DefaultFork::new(ForkId(1));
        let right = DefaultFork::new(ForkId(2));

        assert_eq!(philosopher.meals(), 0);
        philosopher.on_hungry(&left, &right).unwrap();
        philosopher.on_hungry(&left, &right).unwrap();
        assert_eq!(philosopher.meals(), 2);
        assert_eq!(philosopher.phase(), WorkerPhase::Thinking);
        assert!(!left.is_held());
        assert!(!right.is_held());
    }

    #[test]
    fn test_ordered_picks_lower_id_first_for_wrapping_seat() {
        let monitor = Arc::new(ProtocolMonitor::new());
        let collector = Arc::new(crate::telemetry::EventCollector::new(16, 16));
        let mut philosopher = Philosopher::new(PhilosopherId(4));
        philosopher.attach_sink(Arc::new(
            crate::telemetry::SinkSet::new()
                .with(monitor.clone())
                .with(collector.clone()),
        ));

        // Last seat of a five-seat ring: left fork 4, right fork 0.
        let left = DefaultFork::new(ForkId(4));
        let right = DefaultFork::new(ForkId(0));
        philosopher.on_hungry(&left, &right).unwrap();

        let acquired: Vec<ForkId> = collector
            .snapshot()
            .recent
            .iter()
            .filter_map(|event| match event {
                TableEvent::Acquired { fork, .. } => Some(*fork),
                _ => None,
            })
            .collect();
        assert_eq!(acquired, vec![ForkId(0), ForkId(4)]);
        assert!(monitor.violations().is_empty());
        assert_eq!(monitor.observed_meals(PhilosopherId(4)), 1);
    }

    #[test]
    fn test_eat_rejects_single_fork() {
        let philosopher =
            Philosopher::with_strategy(PhilosopherId(0), Arc::new(PickLeftOnly));
        let left = DefaultFork::new(ForkId(0));
        let right = DefaultFork::new(ForkId(1));

        let result = philosopher.on_hungry(&left, &right);
        assert_eq!(
            result,
            Err(TableError::ForeignFork {
                philosopher: PhilosopherId(0),
                fork: ForkId(0),
            })
        );
        assert_eq!(philosopher.meals(), 0);
        assert!(!left.is_held(), "guard must release on the error path");
    }

    #[test]
    fn test_pick_up_rejects_non_adjacent_fork() {
        let stranger = DefaultFork::new(ForkId(7));
        let philosopher = Philosopher::new(PhilosopherId(0));
        let seat = Seat {
            philosopher: &philosopher,
            left: &DefaultFork::new(ForkId(0)),
            right: &DefaultFork::new(ForkId(1)),
            held: Cell::new(0),
        };
        assert!(matches!(
            seat.pick_up(&stranger),
            Err(TableError::ForeignFork { fork: ForkId(7), .. })
        ));
        assert!(!stranger.is_held());
    }

    #[test]
    fn test_error_path_releases_held_fork() {
        let philosopher =
            Philosopher::with_strategy(PhilosopherId(2), Arc::new(FailAfterFirst));
        let left = DefaultFork::new(ForkId(2));
        let right = DefaultFork::new(ForkId(3));

        assert!(philosopher.on_hungry(&left, &right).is_err());
        assert!(!left.is_held());
        assert!(!right.is_held());
        assert_eq!(philosopher.phase(), WorkerPhase::Thinking);
    }

    #[test]
    fn test_phase_is_eating_while_both_forks_held() {
        use crate::strategy::{DelayPlan, DelayRule};

        let strategy =
            OrderedStrategy::new(DelayPlan::default().eating(DelayRule::Fixed { ms: 300 }));
        let philosopher = Philosopher::with_strategy(PhilosopherId(0), Arc::new(strategy));
        let left = DefaultFork::new(ForkId(0));
        let right = DefaultFork::new(ForkId(1));

        thread::scope(|scope| {
            let worker = scope.spawn(|| philosopher.on_hungry(&left, &right));
            thread::sleep(Duration::from_millis(150));
            assert_eq!(philosopher.phase(), WorkerPhase::Eating);
            assert!(left.is_held() && right.is_held());
            assert_eq!(philosopher.meals(), 0);
            worker.join().unwrap().unwrap();
        });

        assert_eq!(philosopher.meals(), 1);
        assert_eq!(philosopher.phase(), WorkerPhase::Thinking);
    }

    #[test]
    fn test_phase_roundtrip() {
        for phase in [
            WorkerPhase::Thinking,
            WorkerPhase::Hungry,
            WorkerPhase::AcquiringFirst,
            WorkerPhase::AcquiringSecond,
            WorkerPhase::Eating,
            WorkerPhase::Releasing,
            WorkerPhase::Stopping,
            WorkerPhase::Stopped,
        ] {
            assert_eq!(WorkerPhase::from_u8(phase as u8), phase);
        }
    }
}
