#![forbid(unsafe_code)]

//! Middleware chain: ordered interceptors around every write.
//!
//! Each interceptor receives a snapshot of the current state, the pending
//! [`Patch`], and a [`Proceed`] token. It continues the chain by calling
//! [`Proceed::proceed`] (pass the patch on unchanged) or
//! [`Proceed::proceed_with`] (replace it entirely). Returning without
//! proceeding drops the write silently. Returning `Err`, or panicking, drops
//! the write and reports a fault.
//!
//! The chain is driven by a plain loop over a captured line-up of stages,
//! not by nested continuations.
//!
//! # Invariants
//!
//! 1. Stages run in registration order.
//! 2. Only the first `proceed` call of a stage counts.
//! 3. A field-filtered stage runs only if the patch *as rewritten so far*
//!    touches one of its fields; otherwise it is skipped transparently.
//! 4. Adding or removing middleware during a run affects later writes only.
//!
//! # Example
//!
//! ```ignore
//! store.add_middleware(Middleware::new(|_state, update, next| {
//!     match update.get(Form::NAME) {
//!         Some(name) => next.proceed_with(Patch::new().with(Form::NAME, name.to_uppercase())),
//!         None => next.proceed(),
//!     }
//!     Ok(())
//! }).for_fields(&[Form::NAME.id()]));
//! ```

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::error::MiddlewareError;
use crate::field::FieldId;
use crate::patch::Patch;

type Interceptor<S> = dyn Fn(&S, &Patch<S>, &mut Proceed<S>) -> Result<(), MiddlewareError>;

/// One stage of the chain: an interceptor plus an optional field filter.
pub struct Middleware<S> {
    interceptor: Rc<Interceptor<S>>,
    fields: Option<Rc<[FieldId]>>,
    name: Cow<'static, str>,
}

impl<S: 'static> Middleware<S> {
    /// Wrap an interceptor that sees every write.
    pub fn new(
        interceptor: impl Fn(&S, &Patch<S>, &mut Proceed<S>) -> Result<(), MiddlewareError> + 'static,
    ) -> Self {
        Self {
            interceptor: Rc::new(interceptor),
            fields: None,
            name: Cow::Borrowed("middleware"),
        }
    }

    /// Restrict this stage to writes touching at least one of `fields`.
    #[must_use]
    pub fn for_fields(mut self, fields: &[FieldId]) -> Self {
        self.fields = Some(Rc::from(fields));
        self
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// The field filter, if any.
    #[must_use]
    pub fn fields(&self) -> Option<&[FieldId]> {
        self.fields.as_deref()
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, patch: &Patch<S>) -> bool {
        self.fields
            .as_deref()
            .is_none_or(|fields| patch.touches_any(fields))
    }
}

impl<S> Clone for Middleware<S> {
    fn clone(&self) -> Self {
        Self {
            interceptor: Rc::clone(&self.interceptor),
            fields: self.fields.clone(),
            name: self.name.clone(),
        }
    }
}

impl<S> fmt::Debug for Middleware<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .field("fields", &self.fields.as_deref())
            .finish()
    }
}

enum Decision<S> {
    Pending,
    Forward,
    Replace(Patch<S>),
}

/// Continuation token handed to each interceptor.
pub struct Proceed<S> {
    decision: Decision<S>,
    extra_calls: usize,
}

impl<S> Proceed<S> {
    fn new() -> Self {
        Self {
            decision: Decision::Pending,
            extra_calls: 0,
        }
    }

    /// Continue with the update unchanged.
    pub fn proceed(&mut self) {
        self.decide(Decision::Forward);
    }

    /// Continue with `patch` in place of the current update.
    pub fn proceed_with(&mut self, patch: Patch<S>) {
        self.decide(Decision::Replace(patch));
    }

    /// Whether this stage has already proceeded.
    #[must_use]
    pub fn has_proceeded(&self) -> bool {
        !matches!(self.decision, Decision::Pending)
    }

    fn decide(&mut self, decision: Decision<S>) {
        if self.has_proceeded() {
            self.extra_calls += 1;
        } else {
            self.decision = decision;
        }
    }
}

impl<S> fmt::Debug for Proceed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proceed")
            .field("proceeded", &self.has_proceeded())
            .finish()
    }
}

/// Identifier of a registered middleware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MiddlewareId(u64);

/// Ordered middleware registrations.
pub(crate) struct MiddlewareChain<S> {
    next_id: u64,
    entries: Vec<(MiddlewareId, Middleware<S>)>,
}

impl<S> MiddlewareChain<S> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, middleware: Middleware<S>) -> MiddlewareId {
        let id = MiddlewareId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, middleware));
        id
    }

    pub(crate) fn remove(&mut self, id: MiddlewareId) -> Option<Middleware<S>> {
        let pos = self.entries.iter().position(|(entry, _)| *entry == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Capture the current stages for one run.
    pub(crate) fn lineup(&self) -> Vec<Middleware<S>> {
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }
}

/// Why a chain run did not produce a patch to commit.
#[derive(Debug)]
pub enum Halt {
    /// A stage returned without proceeding.
    Blocked {
        /// Name of the stage.
        stage: String,
    },
    /// A stage returned an error or panicked.
    Faulted {
        /// Name of the stage.
        stage: String,
        /// The fault.
        error: MiddlewareError,
    },
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { stage } => write!(f, "update blocked by middleware `{stage}`"),
            Self::Faulted { stage, error } => write!(f, "middleware `{stage}` faulted: {error}"),
        }
    }
}

impl std::error::Error for Halt {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Blocked { .. } => None,
            Self::Faulted { error, .. } => Some(error),
        }
    }
}

/// Run `patch` through `lineup`.
///
/// Returns the patch to commit, or why the write was dropped. Faults are
/// logged here; the caller never sees them as errors.
pub(crate) fn run_chain<S: 'static>(
    lineup: &[Middleware<S>],
    state: &S,
    mut patch: Patch<S>,
    catch_panics: bool,
    store: &str,
) -> Result<Patch<S>, Halt> {
    for (stage, middleware) in lineup.iter().enumerate() {
        if !middleware.applies_to(&patch) {
            trace!(store, stage, middleware = middleware.name(), "middleware skipped by field filter");
            continue;
        }

        let mut next = Proceed::new();
        let outcome = if catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| {
                (middleware.interceptor)(state, &patch, &mut next)
            }))
            .unwrap_or_else(|payload| Err(MiddlewareError::from_panic(&*payload)))
        } else {
            (middleware.interceptor)(state, &patch, &mut next)
        };

        if let Err(error) = outcome {
            warn!(store, stage, middleware = middleware.name(), %error, "middleware fault; update dropped");
            return Err(Halt::Faulted {
                stage: middleware.name().to_owned(),
                error,
            });
        }
        if next.extra_calls > 0 {
            debug!(
                store,
                stage,
                middleware = middleware.name(),
                extra_calls = next.extra_calls,
                "proceed called more than once; extra calls ignored"
            );
        }
        match next.decision {
            Decision::Pending => {
                debug!(store, stage, middleware = middleware.name(), "middleware blocked update");
                return Err(Halt::Blocked {
                    stage: middleware.name().to_owned(),
                });
            }
            Decision::Forward => {}
            Decision::Replace(replacement) => patch = replacement,
        }
    }
    Ok(patch)
}

/// Handle returned by [`Store::add_middleware`](crate::Store::add_middleware).
///
/// Unlike [`Subscription`](crate::Subscription), dropping the handle leaves
/// the middleware installed; call [`remove`](Self::remove) to uninstall it.
pub struct MiddlewareHandle<S> {
    chain: Weak<RefCell<MiddlewareChain<S>>>,
    id: MiddlewareId,
    installed: Cell<bool>,
}

impl<S> MiddlewareHandle<S> {
    pub(crate) fn new(chain: &Rc<RefCell<MiddlewareChain<S>>>, id: MiddlewareId) -> Self {
        Self {
            chain: Rc::downgrade(chain),
            id,
            installed: Cell::new(true),
        }
    }

    /// Uninstall the middleware. Idempotent.
    pub fn remove(&self) {
        if !self.installed.replace(false) {
            return;
        }
        if let Some(chain) = self.chain.upgrade() {
            let removed = chain.borrow_mut().remove(self.id);
            drop(removed);
        }
    }

    /// Whether the middleware is still installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed.get() && self.chain.strong_count() > 0
    }

    /// Identifier of the middleware.
    #[must_use]
    pub fn id(&self) -> MiddlewareId {
        self.id
    }
}

impl<S> fmt::Debug for MiddlewareHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareHandle")
            .field("id", &self.id)
            .field("installed", &self.is_installed())
            .finish()
    }
}
