#![forbid(unsafe_code)]

//! Fine-grained reactive state store.
//!
//! A [`Store`] owns one state record and notifies listeners per field: a
//! listener subscribed to `user` is never called for a change to `theme`.
//!
//! - [`Store`]: reads, writes, batching, debouncing and observation.
//! - [`Field`] / [`FieldId`]: typed keys generated by [`store_state!`].
//! - [`Patch`]: a partial update, one value per field.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Middleware`]: interceptors that may block or rewrite updates.
//! - [`BatchScope`]: RAII guard that coalesces notifications.
//! - [`Timing`]: per-write choice between immediate and debounced
//!   notification.
//!
//! # Architecture
//!
//! The store is single-threaded: state lives behind `Rc<RefCell<..>>` and
//! callbacks are plain `Fn` closures. Time is host-driven; debounced
//! notifications and `on_change` deliveries run from
//! [`Store::tick`] / [`Store::flush_microtasks`], reading time from the
//! configured [`Clock`].
//!
//! # Invariants
//!
//! 1. A write whose value is identical to the current one (or equal under a
//!    registered [`skip_set_when`](Store::skip_set_when) predicate) changes
//!    nothing and notifies no one.
//! 2. A listener is called at most once per notification cycle, after the
//!    state it observes has been committed.
//! 3. Listeners run in registration order.
//! 4. A blocked or faulted update is never partially committed.
//! 5. Inside a batch, state is updated immediately and notifications are
//!    deferred until the outermost scope exits.

pub mod batch;
pub mod config;
pub mod debounce;
pub mod equality;
pub mod error;
pub mod field;
pub mod merge;
pub mod middleware;
pub mod patch;
pub mod scheduler;
pub mod store;
pub mod subscription;

pub use batch::BatchScope;
pub use config::StoreConfig;
pub use debounce::Timing;
pub use equality::EqualityRegistry;
pub use error::MiddlewareError;
pub use field::{Field, FieldId, Identity, StoreState};
pub use merge::Merge;
pub use middleware::{Halt, Middleware, MiddlewareHandle, MiddlewareId, Proceed};
pub use patch::{Assignment, Patch, Selection};
pub use scheduler::{Clock, ManualClock, Scheduler, SystemClock, Task, TimerId};
pub use store::Store;
pub use subscription::{ListenerId, Subscription, SubscriptionIndex};
