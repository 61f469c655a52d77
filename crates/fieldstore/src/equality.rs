#![forbid(unsafe_code)]

//! Per-field custom equality predicates.
//!
//! A predicate overrides identity comparison for exactly one field. It is
//! consulted only when the incoming value is *not* identical to the stored
//! one, so registering a predicate never slows down identical writes.
//!
//! When a predicate reports "equal", the store keeps the value it already
//! holds (the old `Rc` stays in place) and notifies nobody.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::field::{Field, FieldId};

pub(crate) type Predicate = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Field → equality predicate table.
#[derive(Default)]
pub struct EqualityRegistry {
    predicates: HashMap<FieldId, Predicate>,
}

impl EqualityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `predicate` for `key`, replacing any previous one.
    ///
    /// The predicate receives `(previous, next)` and returns `true` when the
    /// two should be treated as the same value.
    pub fn register<S: 'static, T: 'static>(
        &mut self,
        key: Field<S, T>,
        predicate: impl Fn(&T, &T) -> bool + 'static,
    ) {
        let erased: Predicate = Rc::new(move |prev: &dyn Any, next: &dyn Any| {
            match (prev.downcast_ref::<T>(), next.downcast_ref::<T>()) {
                (Some(prev), Some(next)) => predicate(prev, next),
                _ => false,
            }
        });
        self.predicates.insert(key.id(), erased);
    }

    /// Remove the predicate for `field`. Returns whether one was registered.
    pub fn unregister(&mut self, field: impl Into<FieldId>) -> bool {
        self.predicates.remove(&field.into()).is_some()
    }

    /// Whether `field` has a predicate.
    #[must_use]
    pub fn contains(&self, field: impl Into<FieldId>) -> bool {
        self.predicates.contains_key(&field.into())
    }

    /// Number of fields with a predicate.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Whether no predicate is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Shared handle to the predicate for `field`.
    ///
    /// Callers invoke the returned predicate after releasing any borrow of
    /// the registry so the predicate may read the store.
    pub(crate) fn predicate(&self, field: FieldId) -> Option<Predicate> {
        self.predicates.get(&field).cloned()
    }

    /// Evaluate the predicate for `field`; `false` when none is registered.
    #[must_use]
    pub fn treats_as_equal(&self, field: FieldId, prev: &dyn Any, next: &dyn Any) -> bool {
        self.predicates
            .get(&field)
            .is_some_and(|predicate| predicate(prev, next))
    }
}

impl fmt::Debug for EqualityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.predicates.keys().copied().collect();
        fields.sort_unstable();
        f.debug_struct("EqualityRegistry")
            .field("fields", &fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::store_state! {
        #[derive(Clone)]
        struct Profile {
            user: Rc<User> => USER,
            score: i64 => SCORE,
        }
    }

    #[derive(Debug, PartialEq)]
    struct User {
        id: u32,
        name: &'static str,
    }

    #[test]
    fn registered_predicate_decides() {
        let mut registry = EqualityRegistry::new();
        registry.register(Profile::USER, |p, n| p.id == n.id && p.name == n.name);

        let alice = Rc::new(User { id: 1, name: "Alice" });
        let alice_copy = Rc::new(User { id: 1, name: "Alice" });
        let bob = Rc::new(User { id: 1, name: "Bob" });

        assert!(registry.treats_as_equal(Profile::USER.id(), &alice, &alice_copy));
        assert!(!registry.treats_as_equal(Profile::USER.id(), &alice, &bob));
    }

    #[test]
    fn missing_predicate_means_not_equal() {
        let registry = EqualityRegistry::new();
        assert!(!registry.treats_as_equal(Profile::SCORE.id(), &1i64, &1i64));
    }

    #[test]
    fn re_register_overwrites() {
        let mut registry = EqualityRegistry::new();
        registry.register(Profile::SCORE, |_, _| true);
        registry.register(Profile::SCORE, |p, n| (p - n).abs() < 10);
        assert_eq!(registry.len(), 1);
        assert!(registry.treats_as_equal(Profile::SCORE.id(), &100i64, &105i64));
        assert!(!registry.treats_as_equal(Profile::SCORE.id(), &100i64, &200i64));
    }

    #[test]
    fn unregister_reverts() {
        let mut registry = EqualityRegistry::new();
        registry.register(Profile::SCORE, |_, _| true);
        assert!(registry.contains(Profile::SCORE));
        assert!(registry.unregister(Profile::SCORE));
        assert!(!registry.unregister(Profile::SCORE));
        assert!(registry.is_empty());
    }

    #[test]
    fn mismatched_types_are_not_equal() {
        let mut registry = EqualityRegistry::new();
        registry.register(Profile::SCORE, |_, _| true);
        assert!(!registry.treats_as_equal(Profile::SCORE.id(), &"x", &1i64));
    }
}
