#![forbid(unsafe_code)]

//! The store: single owner of the state record and entry point for every
//! read and write.
//!
//! # Write path
//!
//! ```text
//! set(patch) ─▶ middleware chain ─▶ identity / equality check ─▶ commit
//!                (may block or         (per field)                  │
//!                 rewrite)                                          ▼
//!                        batch scope open? ─▶ accumulate ──▶ flush at scope exit
//!                        debounced?        ─▶ per-field timer ─▶ notify on tick
//!                        otherwise         ─▶ notify now
//! ```
//!
//! A notification calls each distinct listener watching any changed field
//! once, in registration order.
//!
//! # Re-entrancy
//!
//! No internal borrow is held while user code runs: listeners, interceptors,
//! scheduled tasks and `on_change` callbacks may all read and write the
//! store. Equality predicates run while the state is borrowed for reading;
//! they may read the store but must not write to it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;
use web_time::Instant;

use crate::batch::{BatchController, BatchScope};
use crate::config::StoreConfig;
use crate::debounce::{DebounceController, Timing};
use crate::equality::EqualityRegistry;
use crate::field::{Field, FieldId, Identity, StoreState};
use crate::merge::Merge;
use crate::middleware::{self, Halt, Middleware, MiddlewareChain, MiddlewareHandle};
use crate::patch::{Patch, Selection};
use crate::scheduler::Scheduler;
use crate::subscription::{Subscription, SubscriptionIndex};

pub(crate) struct StoreInner<S: StoreState> {
    pub(crate) config: StoreConfig,
    state: RefCell<S>,
    initial: S,
    equality: RefCell<EqualityRegistry>,
    subscriptions: Rc<RefCell<SubscriptionIndex>>,
    middleware: Rc<RefCell<MiddlewareChain<S>>>,
    pub(crate) batch: BatchController,
    debounce: RefCell<DebounceController>,
    scheduler: Scheduler,
}

impl<S: StoreState> StoreInner<S> {
    fn equal_by_predicate(&self, field: FieldId, prev: &dyn std::any::Any, next: &dyn std::any::Any) -> bool {
        let predicate = self.equality.borrow().predicate(field);
        predicate.is_some_and(|predicate| predicate(prev, next))
    }

    /// Write every assignment that is a real change; return the changed fields.
    fn commit(&self, patch: Patch<S>) -> Vec<FieldId> {
        let mut changed = Vec::with_capacity(patch.len());
        for assignment in patch {
            let field = assignment.field();
            let unchanged = {
                let state = self.state.borrow();
                assignment.is_identical_in(&state)
                    || self.equal_by_predicate(field, assignment.current_any(&state), assignment.value_any())
            };
            if unchanged {
                trace!(store = %self.config.label, %field, "value unchanged; skipped");
                continue;
            }
            assignment.apply(&mut self.state.borrow_mut());
            changed.push(field);
        }
        changed
    }

    fn dispatch(self: &Rc<Self>, changed: &[FieldId], timing: Timing) {
        match timing {
            Timing::Immediate => self.notify(changed),
            Timing::Debounce(delay) => {
                let delay = delay.unwrap_or(self.config.default_debounce);
                for &field in changed {
                    self.debounce(field, delay);
                }
            }
        }
    }

    fn notify(&self, changed: &[FieldId]) {
        if self.batch.is_open() {
            self.batch.record(changed);
        } else {
            self.deliver(changed);
        }
    }

    /// Call every distinct listener watching any of `changed`.
    pub(crate) fn deliver(&self, changed: &[FieldId]) {
        let ids = self.subscriptions.borrow().listeners_for(changed);
        trace!(store = %self.config.label, fields = changed.len(), listeners = ids.len(), "notifying");
        for id in ids {
            let callback = self.subscriptions.borrow().callback(id);
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    fn debounce(self: &Rc<Self>, field: FieldId, delay: Duration) {
        let store = Rc::downgrade(self);
        let timer = self.scheduler.schedule_after(delay, move || {
            let Some(inner) = store.upgrade() else {
                return;
            };
            inner.debounce.borrow_mut().finish(field);
            inner.notify(&[field]);
        });
        let superseded = self.debounce.borrow_mut().replace(field, timer);
        if let Some(superseded) = superseded {
            self.scheduler.cancel(superseded);
            trace!(store = %self.config.label, %field, "debounce timer superseded");
        }
    }

    fn select(&self, fields: &[FieldId]) -> Selection<S> {
        let state = self.state.borrow();
        Selection::from_patch(fields.iter().filter_map(|&field| state.assignment(field)).collect())
    }

    /// Whether any field of `next` changed relative to `prev` under the
    /// same rule as the commit path.
    fn selection_differs(&self, next: &Selection<S>, prev: &Selection<S>) -> bool {
        next.fields().any(|field| {
            let (Some(now), Some(before)) = (next.assignment(field), prev.assignment(field)) else {
                return true;
            };
            !now.is_identical_to(before)
                && !self.equal_by_predicate(field, before.value_any(), now.value_any())
        })
    }

    fn report_change(&self, observer: &ChangeObserver<S>) {
        let next = self.select(&observer.fields);
        let differs = self.selection_differs(&next, &observer.last.borrow());
        if !differs {
            return;
        }
        let prev = observer.last.replace(next.clone());
        (observer.callback)(&next, &prev);
    }
}

struct ChangeObserver<S: StoreState> {
    fields: Vec<FieldId>,
    last: RefCell<Selection<S>>,
    queued: Cell<bool>,
    callback: Box<dyn Fn(&Selection<S>, &Selection<S>)>,
}

/// Reactive container for one state record.
///
/// `Store` is a cheap handle; clones share the same state. It is
/// single-threaded (`!Send`) by construction.
///
/// # Example
///
/// ```ignore
/// fieldstore::store_state! {
///     #[derive(Clone, Debug)]
///     pub struct Counter {
///         pub count: i32 => COUNT,
///     }
/// }
///
/// let store = Store::new(Counter { count: 0 });
/// let _sub = store.subscribe(&[Counter::COUNT.id()], || println!("changed"));
/// store.set_key(Counter::COUNT, 1); // prints "changed"
/// store.set_key(Counter::COUNT, 1); // identical: nothing happens
/// ```
pub struct Store<S: StoreState> {
    inner: Rc<StoreInner<S>>,
}

impl<S: StoreState> Store<S> {
    /// Create a store with the default configuration.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store with `config`.
    #[must_use]
    pub fn with_config(initial: S, config: StoreConfig) -> Self {
        let scheduler = Scheduler::new(Rc::clone(&config.clock));
        Self {
            inner: Rc::new(StoreInner {
                config,
                state: RefCell::new(initial.clone()),
                initial,
                equality: RefCell::new(EqualityRegistry::new()),
                subscriptions: Rc::new(RefCell::new(SubscriptionIndex::new())),
                middleware: Rc::new(RefCell::new(MiddlewareChain::new())),
                batch: BatchController::default(),
                debounce: RefCell::new(DebounceController::default()),
                scheduler,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Snapshot of the whole state.
    #[must_use]
    pub fn get(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Read the state without cloning it.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this store.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.state.borrow())
    }

    /// Current value of one field.
    #[must_use]
    pub fn get_key<T: Clone>(&self, key: Field<S, T>) -> T {
        key.read(&self.inner.state.borrow()).clone()
    }

    /// Read one field without cloning it.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this store.
    pub fn with_key<T, R>(&self, key: Field<S, T>, f: impl FnOnce(&T) -> R) -> R {
        f(key.read(&self.inner.state.borrow()))
    }

    /// Fresh snapshot of the listed fields. Unknown identifiers are ignored.
    #[must_use]
    pub fn select(&self, fields: &[FieldId]) -> Selection<S> {
        self.inner.select(fields)
    }

    /// The state captured at construction, used by [`reset`](Self::reset).
    #[must_use]
    pub fn initial(&self) -> &S {
        &self.inner.initial
    }

    /// `key`'s current value with `partial` merged in. Does not write.
    #[must_use]
    pub fn merge<T: Merge>(&self, key: Field<S, T>, partial: T::Partial) -> T {
        self.with_key(key, |value| value.merge(partial))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Apply a partial update with immediate notification.
    ///
    /// An empty patch is ignored. The update passes through the middleware
    /// chain, if any; a blocked or faulted update leaves state untouched and
    /// is not reported to the caller.
    pub fn set(&self, patch: Patch<S>) {
        self.set_with(patch, Timing::Immediate);
    }

    /// Apply a partial update with the given notification timing.
    pub fn set_with(&self, patch: Patch<S>, timing: Timing) {
        // Already logged by the chain.
        let _ = self.try_set_with(patch, timing);
    }

    /// Like [`set`](Self::set), but report a blocked or faulted update.
    pub fn try_set(&self, patch: Patch<S>) -> Result<(), Halt> {
        self.try_set_with(patch, Timing::Immediate)
    }

    /// Like [`set_with`](Self::set_with), but report a blocked or faulted
    /// update. A write that changes nothing is `Ok`.
    pub fn try_set_with(&self, patch: Patch<S>, timing: Timing) -> Result<(), Halt> {
        if patch.is_empty() {
            return Ok(());
        }

        let lineup = {
            let chain = self.inner.middleware.borrow();
            (!chain.is_empty()).then(|| chain.lineup())
        };
        let patch = match lineup {
            None => patch,
            Some(lineup) => {
                let snapshot = self.get();
                middleware::run_chain(
                    &lineup,
                    &snapshot,
                    patch,
                    self.inner.config.catch_middleware_panics,
                    &self.inner.config.label,
                )?
            }
        };

        let changed = self.inner.commit(patch);
        if changed.is_empty() {
            return Ok(());
        }
        trace!(store = %self.inner.config.label, changed = ?changed, ?timing, "committed");
        self.inner.dispatch(&changed, timing);
        Ok(())
    }

    /// Set a single field.
    pub fn set_key<T: Identity + Clone + 'static>(&self, key: Field<S, T>, value: T) {
        self.set(Patch::new().with(key, value));
    }

    /// Set a single field with the given notification timing.
    pub fn set_key_with<T: Identity + Clone + 'static>(&self, key: Field<S, T>, value: T, timing: Timing) {
        self.set_with(Patch::new().with(key, value), timing);
    }

    /// Merge `partial` into `key`'s value and write the result.
    pub fn merge_set<T: Merge + Identity + Clone + 'static>(&self, key: Field<S, T>, partial: T::Partial) {
        let merged = self.merge(key, partial);
        self.set_key(key, merged);
    }

    /// Restore every field to its initial value.
    pub fn reset(&self) {
        self.reset_keys(S::fields());
    }

    /// Restore the listed fields to their initial values.
    ///
    /// This is an ordinary write: it passes through middleware and notifies.
    pub fn reset_keys(&self, fields: &[FieldId]) {
        let patch: Patch<S> = fields
            .iter()
            .filter_map(|&field| self.inner.initial.assignment(field))
            .collect();
        self.set(patch);
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` inside a batch scope.
    ///
    /// Writes made by `f` are visible immediately; their notifications are
    /// delivered once, deduplicated per listener, when the outermost scope
    /// ends. This also happens when `f` returns an `Err` (which is then
    /// returned unchanged) or panics (the panic keeps unwinding afterwards).
    ///
    /// Debounced writes are not part of the scope's flush: they notify when
    /// their timer fires. A timer that fires while a scope is open is folded
    /// into that scope's flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let scope = self.batch_scope();
        let out = f();
        drop(scope);
        out
    }

    /// Open a batch scope that flushes when the guard is dropped.
    pub fn batch_scope(&self) -> BatchScope<S> {
        BatchScope::open(Rc::clone(&self.inner))
    }

    /// Whether a batch scope is currently open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.inner.batch.is_open()
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Call `listener` after any change to one of `fields`.
    ///
    /// An empty field list registers nothing and returns an inactive
    /// subscription.
    pub fn subscribe(&self, fields: &[FieldId], listener: impl Fn() + 'static) -> Subscription {
        let id = self.inner.subscriptions.borrow_mut().add(fields, listener);
        Subscription::new(&self.inner.subscriptions, id)
    }

    /// Call `callback(new, previous)` at most once per microtask drain when
    /// any of `fields` actually changed since the last call.
    ///
    /// `previous` holds the values seen at the previous call, or at
    /// registration for the first one. Changes that are reverted before the
    /// drain are not reported.
    pub fn on_change(
        &self,
        fields: &[FieldId],
        callback: impl Fn(&Selection<S>, &Selection<S>) + 'static,
    ) -> Subscription {
        let observer = Rc::new(ChangeObserver {
            fields: fields.to_vec(),
            last: RefCell::new(self.select(fields)),
            queued: Cell::new(false),
            callback: Box::new(callback),
        });
        let store = Rc::downgrade(&self.inner);
        self.subscribe(fields, move || {
            if observer.queued.replace(true) {
                return;
            }
            let Some(inner) = store.upgrade() else {
                return;
            };
            let pending = Rc::downgrade(&observer);
            let store = store.clone();
            inner.scheduler.defer(move || {
                let (Some(observer), Some(inner)) = (pending.upgrade(), store.upgrade()) else {
                    return;
                };
                observer.queued.set(false);
                inner.report_change(&observer);
            });
        })
    }

    // ------------------------------------------------------------------
    // Middleware and equality
    // ------------------------------------------------------------------

    /// Append a middleware stage.
    pub fn add_middleware(&self, middleware: Middleware<S>) -> MiddlewareHandle<S> {
        let id = self.inner.middleware.borrow_mut().add(middleware);
        MiddlewareHandle::new(&self.inner.middleware, id)
    }

    /// Treat writes to `key` as no-ops whenever `predicate(previous, next)`
    /// returns `true`. The stored value is kept in that case.
    pub fn skip_set_when<T: 'static>(&self, key: Field<S, T>, predicate: impl Fn(&T, &T) -> bool + 'static) {
        self.inner.equality.borrow_mut().register(key, predicate);
    }

    /// Revert `field` to identity comparison. Returns whether a predicate
    /// was registered.
    pub fn remove_skip_set_when(&self, field: impl Into<FieldId>) -> bool {
        self.inner.equality.borrow_mut().unregister(field)
    }

    // ------------------------------------------------------------------
    // Host-driven time
    // ------------------------------------------------------------------

    /// Run queued microtasks (`on_change` deliveries). Returns how many ran.
    pub fn flush_microtasks(&self) -> usize {
        self.inner.scheduler.run_microtasks()
    }

    /// Run microtasks and every debounce timer due now.
    pub fn tick(&self) -> usize {
        self.inner.scheduler.tick()
    }

    /// Earliest pending debounce deadline, for hosts that sleep between ticks.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.scheduler.next_deadline()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Number of registered listeners, `on_change` observers included.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    /// Number of listeners watching `field`.
    #[must_use]
    pub fn field_listener_count(&self, field: impl Into<FieldId>) -> usize {
        self.inner.subscriptions.borrow().field_listener_count(field.into())
    }

    /// Number of installed middleware stages.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.borrow().len()
    }

    /// Number of fields with a pending debounced notification.
    #[must_use]
    pub fn pending_debounces(&self) -> usize {
        self.inner.debounce.borrow().len()
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.config.label
    }
}

impl<S: StoreState> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: StoreState + fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.inner.config.label)
            .field("state", &*self.inner.state.borrow())
            .field("listeners", &self.listener_count())
            .field("middleware", &self.middleware_count())
            .field("batch_depth", &self.inner.batch.depth())
            .finish()
    }
}
