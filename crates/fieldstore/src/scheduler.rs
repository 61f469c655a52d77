#![forbid(unsafe_code)]

//! Per-store deferred work: a microtask queue and a timer queue.
//!
//! The store never spawns threads or talks to an async runtime. Deferred
//! notifications (debounce timers, `on_change` coalescing) are queued here
//! and run when the host drives the store with
//! [`Store::tick`](crate::Store::tick) or
//! [`Store::flush_microtasks`](crate::Store::flush_microtasks), typically
//! once per frame of the UI event loop.
//!
//! # Invariants
//!
//! 1. Microtasks run in FIFO order; a microtask queued by a running task runs
//!    in the same drain.
//! 2. Timers fire in deadline order, ties broken by scheduling order.
//! 3. A timer scheduled while timers are firing never fires in that same
//!    pass, even with a zero delay.
//! 4. The microtask queue is drained after every timer that fires.
//! 5. No internal borrow is held while a task runs, so tasks may call back
//!    into the store.
//! 6. A timer whose deadline is not representable as an `Instant` is parked:
//!    it never fires and reports no deadline, but can still be cancelled.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Source of the current time for timers.
pub trait Clock {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic hosts and tests.
///
/// Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    /// A clock frozen at the current wall-clock instant.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// A clock frozen at `start`.
    #[must_use]
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: Instant) {
        self.now.set(instant);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Handle to a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Microtask and timer queues sharing one clock.
pub struct Scheduler {
    clock: Rc<dyn Clock>,
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Instant, TimerId), Task>>,
    deadlines: RefCell<HashMap<TimerId, Instant>>,
    parked: RefCell<HashMap<TimerId, Task>>,
    next_timer: Cell<u64>,
}

impl Scheduler {
    /// Create a scheduler reading time from `clock`.
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            microtasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            deadlines: RefCell::new(HashMap::new()),
            parked: RefCell::new(HashMap::new()),
            next_timer: Cell::new(0),
        }
    }

    /// Current time according to the scheduler's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Queue a microtask.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule_after(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let id = TimerId(self.next_timer.get());
        self.next_timer.set(id.0 + 1);
        let Some(deadline) = self.clock.now().checked_add(delay) else {
            self.parked.borrow_mut().insert(id, Box::new(task));
            return id;
        };
        self.timers.borrow_mut().insert((deadline, id), Box::new(task));
        self.deadlines.borrow_mut().insert(id, deadline);
        id
    }

    /// Cancel a pending timer. Returns whether it was still pending.
    pub fn cancel(&self, id: TimerId) -> bool {
        let Some(deadline) = self.deadlines.borrow_mut().remove(&id) else {
            let task = self.parked.borrow_mut().remove(&id);
            return task.is_some();
        };
        let task = self.timers.borrow_mut().remove(&(deadline, id));
        drop(task);
        true
    }

    /// Drain the microtask queue. Returns how many tasks ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.microtasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Run microtasks, then every timer due now, draining microtasks after
    /// each timer. Returns how many tasks ran.
    pub fn tick(&self) -> usize {
        let mut ran = self.run_microtasks();
        let now = self.clock.now();
        let horizon = TimerId(self.next_timer.get());
        while let Some(task) = self.pop_due(now, horizon) {
            task();
            ran += 1;
            ran += self.run_microtasks();
        }
        ran
    }

    fn pop_due(&self, now: Instant, horizon: TimerId) -> Option<Task> {
        let mut timers = self.timers.borrow_mut();
        let key = timers
            .keys()
            .take_while(|(deadline, _)| *deadline <= now)
            .find(|(_, id)| *id < horizon)
            .copied()?;
        self.deadlines.borrow_mut().remove(&key.1);
        timers.remove(&key)
    }

    /// Earliest pending timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    /// Number of queued microtasks.
    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Number of pending timers, parked ones included.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len() + self.parked.borrow().len()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("microtasks", &self.pending_microtasks())
            .field("timers", &self.pending_timers())
            .finish()
    }
}
