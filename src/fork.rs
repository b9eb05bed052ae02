//! Forks - mutually exclusive resources shared by two neighbouring seats.
//!
//! A fork is a mutex/condvar pair that records which worker thread holds it.
//! Holder tracking lets misuse surface as an error instead of silently
//! corrupting the table:
//! - re-acquiring a fork the calling thread already holds
//! - releasing a fork the calling thread does not hold
//!
//! Fork identities are totally ordered. The resource hierarchy strategy
//! relies on that order to keep the wait-for graph acyclic.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Stable fork identity, equal to the fork's ring position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ForkId(pub usize);

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability interface for a lockable fork.
///
/// Implementations must be safe under contention from the two workers
/// adjacent to the fork. `release` must never block.
pub trait Fork: Send + Sync + fmt::Debug {
    fn id(&self) -> ForkId;

    /// Block until the fork is free, then record the calling thread as holder.
    fn acquire(&self) -> Result<(), TableError>;

    /// Free the fork. Fails if the calling thread is not the holder.
    fn release(&self) -> Result<(), TableError>;
}

/// Default fork backed by `std::sync::Mutex` + `Condvar`.
#[derive(Debug)]
pub struct DefaultFork {
    id: ForkId,
    holder: Mutex<Option<ThreadId>>,
    freed: Condvar,
}

impl DefaultFork {
    pub fn new(id: ForkId) -> Self {
        Self {
            id,
            holder: Mutex::new(None),
            freed: Condvar::new(),
        }
    }

    /// True while some worker holds the fork.
    pub fn is_held(&self) -> bool {
        self.lock_holder().map(|h| h.is_some()).unwrap_or(false)
    }

    fn lock_holder(&self) -> Result<MutexGuard<'_, Option<ThreadId>>, TableError> {
        self.holder.lock().map_err(|_| TableError::LockPoisoned {
            component: format!("fork {}", self.id),
        })
    }
}

impl Fork for DefaultFork {
    fn id(&self) -> ForkId {
        self.id
    }

    fn acquire(&self) -> Result<(), TableError> {
        let me = thread::current().id();
        let mut holder = self.lock_holder()?;
        if *holder == Some(me) {
            return Err(TableError::ForkAlreadyHeld { fork: self.id });
        }
        while holder.is_some() {
            holder = self
                .freed
                .wait(holder)
                .map_err(|_| TableError::LockPoisoned {
                    component: format!("fork {}", self.id),
                })?;
        }
        *holder = Some(me);
        Ok(())
    }

    fn release(&self) -> Result<(), TableError> {
        let me = thread::current().id();
        let mut holder = self.lock_holder()?;
        if *holder != Some(me) {
            return Err(TableError::ForkNotHeld { fork: self.id });
        }
        *holder = None;
        drop(holder);
        self.freed.notify_one();
        Ok(())
    }
}

/// Resource-behaviour variant that keeps the fork a while after acquiring.
///
/// Stretches the window between a worker's first and second acquisition,
/// which is where a missing fork order turns into a circular wait.
#[derive(Debug)]
pub struct DelayedFork {
    inner: DefaultFork,
    hold_after_acquire: Duration,
}

impl DelayedFork {
    pub fn new(id: ForkId, hold_after_acquire: Duration) -> Self {
        Self {
            inner: DefaultFork::new(id),
            hold_after_acquire,
        }
    }
}

impl Fork for DelayedFork {
    fn id(&self) -> ForkId {
        self.inner.id()
    }

    fn acquire(&self) -> Result<(), TableError> {
        log::trace!("[Fork] {:?} trying to acquire fork {}", thread::current().id(), self.id());
        self.inner.acquire()?;
        log::trace!("[Fork] {:?} acquired fork {}", thread::current().id(), self.id());
        if !self.hold_after_acquire.is_zero() {
            thread::sleep(self.hold_after_acquire);
        }
        Ok(())
    }

    fn release(&self) -> Result<(), TableError> {
        self.inner.release()
    }
}
