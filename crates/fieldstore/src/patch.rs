#![forbid(unsafe_code)]

//! Pending updates: type-erased field assignments.
//!
//! A [`Patch`] is the partial update that travels through the middleware
//! chain before it is committed. It holds at most one [`Assignment`] per
//! field, in insertion order. Values are type-erased so a single patch can
//! carry fields of different types, but every read goes through a typed
//! [`Field`] key.
//!
//! A [`Selection`] is the read-side counterpart returned by
//! [`Store::select`](crate::Store::select): a fresh snapshot of the
//! requested fields.

use std::any::Any;
use std::fmt;

use crate::field::{Field, FieldId, Identity};

trait Slot<S>: 'static {
    fn field(&self) -> FieldId;
    fn value(&self) -> &dyn Any;
    fn value_mut(&mut self) -> &mut dyn Any;
    fn current<'a>(&self, state: &'a S) -> &'a dyn Any;
    fn is_identical_to(&self, other: &dyn Any) -> bool;
    fn is_identical_in(&self, state: &S) -> bool;
    fn write(self: Box<Self>, state: &mut S);
    fn clone_slot(&self) -> Box<dyn Slot<S>>;
}

struct Typed<S, T> {
    key: Field<S, T>,
    value: T,
}

impl<S: 'static, T: Identity + Clone + 'static> Slot<S> for Typed<S, T> {
    fn field(&self) -> FieldId {
        self.key.id()
    }

    fn value(&self) -> &dyn Any {
        &self.value
    }

    fn value_mut(&mut self) -> &mut dyn Any {
        &mut self.value
    }

    fn current<'a>(&self, state: &'a S) -> &'a dyn Any {
        self.key.read(state)
    }

    fn is_identical_to(&self, other: &dyn Any) -> bool {
        other
            .downcast_ref::<T>()
            .is_some_and(|other| self.value.is_identical(other))
    }

    fn is_identical_in(&self, state: &S) -> bool {
        self.value.is_identical(self.key.read(state))
    }

    fn write(self: Box<Self>, state: &mut S) {
        let Typed { key, value } = *self;
        *key.write(state) = value;
    }

    fn clone_slot(&self) -> Box<dyn Slot<S>> {
        Box::new(Typed {
            key: self.key,
            value: self.value.clone(),
        })
    }
}

/// A single `(field, value)` pair of a pending update.
pub struct Assignment<S> {
    slot: Box<dyn Slot<S>>,
}

impl<S: 'static> Assignment<S> {
    /// Assign `value` to `key`.
    pub fn new<T: Identity + Clone + 'static>(key: Field<S, T>, value: T) -> Self {
        Self {
            slot: Box::new(Typed { key, value }),
        }
    }

    /// The field this assignment targets.
    #[must_use]
    pub fn field(&self) -> FieldId {
        self.slot.field()
    }

    /// Typed view of the assigned value, if `key` names this assignment's field.
    #[must_use]
    pub fn get<T: 'static>(&self, key: Field<S, T>) -> Option<&T> {
        if key.id() != self.field() {
            return None;
        }
        self.slot.value().downcast_ref()
    }

    /// Mutable typed view of the assigned value.
    pub fn get_mut<T: 'static>(&mut self, key: Field<S, T>) -> Option<&mut T> {
        if key.id() != self.field() {
            return None;
        }
        self.slot.value_mut().downcast_mut()
    }

    /// The assigned value, type-erased.
    #[must_use]
    pub fn value_any(&self) -> &dyn Any {
        self.slot.value()
    }

    /// The current value of this assignment's field in `state`, type-erased.
    #[must_use]
    pub fn current_any<'a>(&self, state: &'a S) -> &'a dyn Any {
        self.slot.current(state)
    }

    /// Whether the assigned value is identical to the field's value in `state`.
    #[must_use]
    pub fn is_identical_in(&self, state: &S) -> bool {
        self.slot.is_identical_in(state)
    }

    /// Whether the assigned value is identical to `other`'s value.
    ///
    /// Assignments to different fields are never identical.
    #[must_use]
    pub fn is_identical_to(&self, other: &Assignment<S>) -> bool {
        self.field() == other.field() && self.slot.is_identical_to(other.slot.value())
    }

    /// Write the value into `state`.
    pub fn apply(self, state: &mut S) {
        self.slot.write(state);
    }
}

impl<S: 'static> Clone for Assignment<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone_slot(),
        }
    }
}

impl<S: 'static> fmt::Debug for Assignment<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Assignment").field(&self.slot.field()).finish()
    }
}

/// A partial update: at most one assignment per field, in insertion order.
pub struct Patch<S> {
    assignments: Vec<Assignment<S>>,
}

impl<S: 'static> Patch<S> {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            assignments: Vec::new(),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Identity + Clone + 'static>(mut self, key: Field<S, T>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Assign `value` to `key`, replacing any earlier assignment of that field
    /// in place.
    pub fn insert<T: Identity + Clone + 'static>(&mut self, key: Field<S, T>, value: T) {
        self.push(Assignment::new(key, value));
    }

    /// Add an assignment, replacing any earlier assignment of the same field.
    pub fn push(&mut self, assignment: Assignment<S>) {
        let field = assignment.field();
        match self.assignments.iter_mut().find(|a| a.field() == field) {
            Some(slot) => *slot = assignment,
            None => self.assignments.push(assignment),
        }
    }

    /// The value assigned to `key`, if any.
    #[must_use]
    pub fn get<T: 'static>(&self, key: Field<S, T>) -> Option<&T> {
        self.assignment(key.id()).and_then(|a| a.get(key))
    }

    /// Mutable access to the value assigned to `key`, if any.
    pub fn get_mut<T: 'static>(&mut self, key: Field<S, T>) -> Option<&mut T> {
        self.assignments
            .iter_mut()
            .find(|a| a.field() == key.id())
            .and_then(|a| a.get_mut(key))
    }

    /// The assignment for `field`, if any.
    #[must_use]
    pub fn assignment(&self, field: FieldId) -> Option<&Assignment<S>> {
        self.assignments.iter().find(|a| a.field() == field)
    }

    /// Whether `field` is assigned.
    #[must_use]
    pub fn contains(&self, field: impl Into<FieldId>) -> bool {
        let field = field.into();
        self.assignments.iter().any(|a| a.field() == field)
    }

    /// Whether any of `fields` is assigned.
    #[must_use]
    pub fn touches_any(&self, fields: &[FieldId]) -> bool {
        self.assignments.iter().any(|a| fields.contains(&a.field()))
    }

    /// Remove and return the assignment for `field`.
    pub fn remove(&mut self, field: impl Into<FieldId>) -> Option<Assignment<S>> {
        let field = field.into();
        let pos = self.assignments.iter().position(|a| a.field() == field)?;
        Some(self.assignments.remove(pos))
    }

    /// Assigned fields, in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.assignments.iter().map(Assignment::field)
    }

    /// Iterate assignments in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Assignment<S>> {
        self.assignments.iter()
    }

    /// Number of assigned fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether the patch assigns nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Write every assignment into `state`, bypassing any store.
    pub fn apply_to(self, state: &mut S) {
        for assignment in self.assignments {
            assignment.apply(state);
        }
    }

    /// Return `state` with this patch applied.
    #[must_use]
    pub fn applied_to(self, mut state: S) -> S {
        self.apply_to(&mut state);
        state
    }
}

impl<S: 'static> Default for Patch<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Clone for Patch<S> {
    fn clone(&self) -> Self {
        Self {
            assignments: self.assignments.clone(),
        }
    }
}

impl<S: 'static> fmt::Debug for Patch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field(
                "fields",
                &self.assignments.iter().map(|a| a.slot.field()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<S: 'static> FromIterator<Assignment<S>> for Patch<S> {
    fn from_iter<I: IntoIterator<Item = Assignment<S>>>(iter: I) -> Self {
        let mut patch = Self::new();
        for assignment in iter {
            patch.push(assignment);
        }
        patch
    }
}

impl<S> IntoIterator for Patch<S> {
    type Item = Assignment<S>;
    type IntoIter = std::vec::IntoIter<Assignment<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.assignments.into_iter()
    }
}

/// A point-in-time snapshot of selected fields.
///
/// Every call to [`Store::select`](crate::Store::select) builds a new one.
pub struct Selection<S> {
    values: Patch<S>,
}

impl<S: 'static> Selection<S> {
    pub(crate) fn from_patch(values: Patch<S>) -> Self {
        Self { values }
    }

    /// The selected value of `key`, or `None` if it was not selected.
    #[must_use]
    pub fn get<T: 'static>(&self, key: Field<S, T>) -> Option<&T> {
        self.values.get(key)
    }

    /// The selected value of `field`, type-erased.
    #[must_use]
    pub fn assignment(&self, field: FieldId) -> Option<&Assignment<S>> {
        self.values.assignment(field)
    }

    /// Selected fields.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.values.fields()
    }

    /// Number of selected fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Turn the snapshot into a patch that would restore these values.
    #[must_use]
    pub fn into_patch(self) -> Patch<S> {
        self.values
    }
}

impl<S: 'static> Clone for Selection<S> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
        }
    }
}

impl<S: 'static> fmt::Debug for Selection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field(
                "fields",
                &self.values.assignments.iter().map(|a| a.slot.field()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
