#![forbid(unsafe_code)]

//! Batching: defer and deduplicate notifications across several writes.
//!
//! While a [`BatchScope`] is open, writes still update state immediately but
//! their changed fields are accumulated instead of notified. When the
//! outermost scope closes, each distinct listener watching any accumulated
//! field is called exactly once.
//!
//! # Invariants
//!
//! 1. Nested scopes are transparent; only the outermost scope flushes.
//! 2. The flush happens on every exit path: normal return, early `?`
//!    return, and panic unwinding (from the guard's `Drop`).
//! 3. A scope belongs to one store and must close within the synchronous
//!    extent that opened it; asynchronous code cannot join a scope in
//!    progress.
//!
//! # Panics
//!
//! A listener that panics while a scope is being closed by unwinding aborts
//! the process, as for any panic during unwinding.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::field::{FieldId, StoreState};
use crate::store::StoreInner;

/// Nesting depth plus the fields changed inside the current outermost scope.
#[derive(Default)]
pub(crate) struct BatchController {
    depth: Cell<usize>,
    changed: RefCell<BTreeSet<FieldId>>,
}

impl BatchController {
    pub(crate) fn enter(&self) {
        if self.depth.get() == 0 {
            self.changed.borrow_mut().clear();
        }
        self.depth.set(self.depth.get() + 1);
    }

    /// Leave a scope. Returns the accumulated fields when the outermost
    /// scope closes.
    pub(crate) fn exit(&self) -> Option<BTreeSet<FieldId>> {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        (depth == 0).then(|| std::mem::take(&mut *self.changed.borrow_mut()))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.depth.get() > 0
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }

    pub(crate) fn record(&self, fields: &[FieldId]) {
        self.changed.borrow_mut().extend(fields.iter().copied());
    }
}

impl fmt::Debug for BatchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchController")
            .field("depth", &self.depth.get())
            .field("changed", &self.changed.borrow().len())
            .finish()
    }
}

/// RAII guard for a batch scope on one store.
///
/// Obtained from [`Store::batch_scope`](crate::Store::batch_scope);
/// [`Store::batch`](crate::Store::batch) wraps a closure in one.
#[must_use = "dropping a BatchScope closes it immediately"]
pub struct BatchScope<S: StoreState> {
    store: Rc<StoreInner<S>>,
}

impl<S: StoreState> BatchScope<S> {
    pub(crate) fn open(store: Rc<StoreInner<S>>) -> Self {
        store.batch.enter();
        Self { store }
    }

    /// Current nesting depth, including this scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.store.batch.depth()
    }
}

impl<S: StoreState> Drop for BatchScope<S> {
    fn drop(&mut self) {
        let Some(changed) = self.store.batch.exit() else {
            return;
        };
        if changed.is_empty() {
            return;
        }
        debug!(
            store = %self.store.config.label,
            fields = changed.len(),
            unwinding = std::thread::panicking(),
            "flushing batch"
        );
        let changed: Vec<FieldId> = changed.into_iter().collect();
        self.store.deliver(&changed);
    }
}

impl<S: StoreState> fmt::Debug for BatchScope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: FieldId = FieldId::new("a");
    const B: FieldId = FieldId::new("b");

    #[test]
    fn only_outermost_exit_returns_fields() {
        let batch = BatchController::default();
        batch.enter();
        batch.record(&[A]);
        batch.enter();
        batch.record(&[B, A]);
        assert_eq!(batch.depth(), 2);
        assert!(batch.exit().is_none());
        let flushed = batch.exit().unwrap();
        assert_eq!(flushed.into_iter().collect::<Vec<_>>(), vec![A, B]);
        assert!(!batch.is_open());
    }

    #[test]
    fn new_outer_scope_starts_empty() {
        let batch = BatchController::default();
        batch.enter();
        batch.record(&[A]);
        batch.exit();
        batch.enter();
        assert!(batch.exit().unwrap().is_empty());
    }

    #[test]
    fn unbalanced_exit_saturates() {
        let batch = BatchController::default();
        assert!(batch.exit().unwrap().is_empty());
        assert_eq!(batch.depth(), 0);
    }
}
