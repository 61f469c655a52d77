#![forbid(unsafe_code)]

//! Per-field trailing-edge debounce of notifications.
//!
//! Debouncing never delays the state mutation, only the notification. Each
//! field owns at most one pending timer; a new debounced write to the same
//! field cancels it and schedules a fresh one. Fields are independent.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::field::FieldId;
use crate::scheduler::TimerId;

/// How a write's notification is timed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timing {
    /// Notify right after commit (or at the end of the enclosing batch).
    #[default]
    Immediate,
    /// Notify once no further debounced write has touched the field for the
    /// given delay. `None` uses the store's default delay.
    Debounce(Option<Duration>),
}

impl Timing {
    /// Debounce with the store's default delay (zero unless configured).
    #[must_use]
    pub const fn debounced() -> Self {
        Self::Debounce(None)
    }

    /// Debounce with an explicit delay.
    #[must_use]
    pub const fn debounce(delay: Duration) -> Self {
        Self::Debounce(Some(delay))
    }
}

/// Field → pending timer.
#[derive(Default)]
pub(crate) struct DebounceController {
    timers: HashMap<FieldId, TimerId>,
}

impl DebounceController {
    /// Record `timer` as the live timer for `field`, returning the timer it
    /// supersedes.
    pub(crate) fn replace(&mut self, field: FieldId, timer: TimerId) -> Option<TimerId> {
        self.timers.insert(field, timer)
    }

    /// Forget `field`'s timer once it fires. Superseded timers are
    /// cancelled before they can fire, so the firing timer is the live one.
    pub(crate) fn finish(&mut self, field: FieldId) -> Option<TimerId> {
        self.timers.remove(&field)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

impl fmt::Debug for DebounceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceController")
            .field("pending", &self.timers.len())
            .finish()
    }
}
