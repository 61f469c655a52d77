#![forbid(unsafe_code)]

//! Key-subscription index: which listeners watch which fields.
//!
//! # Invariants
//!
//! 1. A listener registered for several fields is still one listener: a
//!    notification touching any number of its fields calls it once.
//! 2. Listeners are called in registration order.
//! 3. A listener removed before its turn in a notification cycle is not
//!    called, even if the cycle had already collected it.
//! 4. [`Subscription::unsubscribe`] is idempotent; dropping the guard also
//!    unsubscribes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::field::FieldId;

pub(crate) type Listener = Rc<dyn Fn()>;

/// Identifier of a registered listener. Ordered by registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Entry {
    callback: Listener,
    fields: Vec<FieldId>,
}

/// Field → listener set mapping.
#[derive(Default)]
pub struct SubscriptionIndex {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Entry>,
    by_field: HashMap<FieldId, BTreeSet<ListenerId>>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every field in `fields`.
    ///
    /// Duplicate fields are collapsed. Returns `None` for an empty field list.
    pub fn add(&mut self, fields: &[FieldId], callback: impl Fn() + 'static) -> Option<ListenerId> {
        self.add_shared(fields, Rc::new(callback))
    }

    pub(crate) fn add_shared(&mut self, fields: &[FieldId], callback: Listener) -> Option<ListenerId> {
        if fields.is_empty() {
            return None;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        let mut unique = Vec::with_capacity(fields.len());
        for &field in fields {
            if !unique.contains(&field) {
                unique.push(field);
                self.by_field.entry(field).or_default().insert(id);
            }
        }
        self.listeners.insert(
            id,
            Entry {
                callback,
                fields: unique,
            },
        );
        Some(id)
    }

    /// Remove a listener, returning its callback.
    ///
    /// The callback is handed back so the caller can drop it after releasing
    /// any borrow of the index; dropping a callback may drop guards that
    /// unsubscribe other listeners.
    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<Listener> {
        let entry = self.listeners.remove(&id)?;
        for field in &entry.fields {
            if let Some(set) = self.by_field.get_mut(field) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_field.remove(field);
                }
            }
        }
        Some(entry.callback)
    }

    /// Distinct listeners watching any of `fields`, in registration order.
    #[must_use]
    pub fn listeners_for<'a>(&self, fields: impl IntoIterator<Item = &'a FieldId>) -> Vec<ListenerId> {
        let mut ids = BTreeSet::new();
        for field in fields {
            if let Some(set) = self.by_field.get(field) {
                ids.extend(set.iter().copied());
            }
        }
        ids.into_iter().collect()
    }

    pub(crate) fn callback(&self, id: ListenerId) -> Option<Listener> {
        self.listeners.get(&id).map(|entry| Rc::clone(&entry.callback))
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of listeners watching `field`.
    #[must_use]
    pub fn field_listener_count(&self, field: FieldId) -> usize {
        self.by_field.get(&field).map_or(0, BTreeSet::len)
    }
}

impl fmt::Debug for SubscriptionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionIndex")
            .field("listeners", &self.listeners.len())
            .field("fields", &self.by_field.len())
            .finish()
    }
}

/// RAII guard for a listener registration.
///
/// Dropping the guard unsubscribes. [`unsubscribe`](Self::unsubscribe) does
/// the same eagerly and may be called any number of times.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    index: Weak<RefCell<SubscriptionIndex>>,
    id: Option<ListenerId>,
    active: Cell<bool>,
}

impl Subscription {
    pub(crate) fn new(index: &Rc<RefCell<SubscriptionIndex>>, id: Option<ListenerId>) -> Self {
        Self {
            index: Rc::downgrade(index),
            id,
            active: Cell::new(id.is_some()),
        }
    }

    /// Stop delivering notifications to this listener.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        let (Some(id), Some(index)) = (self.id, self.index.upgrade()) else {
            return;
        };
        let removed = index.borrow_mut().remove(id);
        drop(removed);
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get() && self.index.strong_count() > 0
    }

    /// The listener's identifier; `None` for an empty-field subscription.
    #[must_use]
    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: FieldId = FieldId::new("a");
    const B: FieldId = FieldId::new("b");
    const C: FieldId = FieldId::new("c");

    #[test]
    fn one_listener_many_fields_is_deduplicated() {
        let mut index = SubscriptionIndex::new();
        let id = index.add(&[A, B], || {}).unwrap();
        assert_eq!(index.listeners_for(&[A, B]), vec![id]);
        assert_eq!(index.field_listener_count(A), 1);
        assert_eq!(index.field_listener_count(B), 1);
    }

    #[test]
    fn listeners_come_back_in_registration_order() {
        let mut index = SubscriptionIndex::new();
        let first = index.add(&[B], || {}).unwrap();
        let second = index.add(&[A], || {}).unwrap();
        let third = index.add(&[A, B], || {}).unwrap();
        assert_eq!(index.listeners_for(&[A, B]), vec![first, second, third]);
        assert_eq!(index.listeners_for(&[C]), Vec::<ListenerId>::new());
    }

    #[test]
    fn empty_field_list_registers_nothing() {
        let mut index = SubscriptionIndex::new();
        assert!(index.add(&[], || {}).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn duplicate_fields_collapse() {
        let mut index = SubscriptionIndex::new();
        let id = index.add(&[A, A, A], || {}).unwrap();
        assert_eq!(index.field_listener_count(A), 1);
        assert!(index.remove(id).is_some());
        assert_eq!(index.field_listener_count(A), 0);
    }

    #[test]
    fn remove_cleans_field_sets() {
        let mut index = SubscriptionIndex::new();
        let id = index.add(&[A, B], || {}).unwrap();
        assert!(index.remove(id).is_some());
        assert!(index.remove(id).is_none());
        assert!(index.listeners_for(&[A, B]).is_empty());
        assert!(!index.contains(id));
    }

    #[test]
    fn subscription_unsubscribe_is_idempotent() {
        let index = Rc::new(RefCell::new(SubscriptionIndex::new()));
        let id = index.borrow_mut().add(&[A], || {});
        let sub = Subscription::new(&index, id);
        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(index.borrow().is_empty());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let index = Rc::new(RefCell::new(SubscriptionIndex::new()));
        {
            let id = index.borrow_mut().add(&[A], || {});
            let _sub = Subscription::new(&index, id);
            assert_eq!(index.borrow().len(), 1);
        }
        assert_eq!(index.borrow().len(), 0);
    }

    #[test]
    fn subscription_outliving_index_is_harmless() {
        let index = Rc::new(RefCell::new(SubscriptionIndex::new()));
        let id = index.borrow_mut().add(&[A], || {});
        let sub = Subscription::new(&index, id);
        drop(index);
        assert!(!sub.is_active());
        sub.unsubscribe();
    }

    #[test]
    fn dropping_callback_that_owns_a_guard_does_not_reborrow() {
        let index = Rc::new(RefCell::new(SubscriptionIndex::new()));
        let inner_id = index.borrow_mut().add(&[B], || {});
        let inner = Subscription::new(&index, inner_id);
        let outer_id = index.borrow_mut().add(&[A], move || {
            let _ = inner.is_active();
        });
        let outer = Subscription::new(&index, outer_id);
        outer.unsubscribe();
        assert!(index.borrow().is_empty());
    }
}
