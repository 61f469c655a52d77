#![forbid(unsafe_code)]

//! Field table: typed keys over a fixed-shape state record.
//!
//! A store's state is an ordinary Rust struct. The [`store_state!`] macro
//! declares it and attaches one [`Field`] constant per struct field. A
//! `Field<S, T>` carries the field's runtime [`FieldId`] plus accessor
//! function pointers, so call sites stay fully typed while the store's
//! subscription index and equality registry dispatch on `FieldId`.
//!
//! # Identity
//!
//! "Did this field change?" is answered first by [`Identity`], the cheap
//! default comparison:
//!
//! | Type | Identity |
//! |------|----------|
//! | integers, `bool`, `char` | value equality |
//! | `f32`, `f64` | bitwise, except every NaN is identical to every NaN |
//! | `Rc<T>`, `Arc<T>` | pointer equality |
//! | `String`, `&'static str`, `Box`, `Option`, `Vec`, tuples | structural |
//!
//! Shared composite values should live behind `Rc`/`Arc` so that identity
//! means "same allocation". User types opt in with [`identity_by_eq!`] or a
//! hand-written impl.
//!
//! [`store_state!`]: crate::store_state
//! [`identity_by_eq!`]: crate::identity_by_eq

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

use crate::patch::Assignment;

/// Runtime identifier of a field: its declared name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(&'static str);

impl FieldId {
    /// Create an identifier from a field name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Typed key for the field of type `T` inside state record `S`.
///
/// Keys are `Copy` and are normally produced by [`store_state!`](crate::store_state).
pub struct Field<S, T> {
    id: FieldId,
    read: fn(&S) -> &T,
    write: fn(&mut S) -> &mut T,
}

impl<S, T> Field<S, T> {
    /// Build a key from a field name and its accessors.
    #[must_use]
    pub const fn new(name: &'static str, read: fn(&S) -> &T, write: fn(&mut S) -> &mut T) -> Self {
        Self {
            id: FieldId::new(name),
            read,
            write,
        }
    }

    /// Runtime identifier of this field.
    #[must_use]
    pub const fn id(&self) -> FieldId {
        self.id
    }

    /// Field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Borrow this field out of a state record.
    pub fn read<'a>(&self, state: &'a S) -> &'a T {
        (self.read)(state)
    }

    /// Mutably borrow this field out of a state record.
    pub fn write<'a>(&self, state: &'a mut S) -> &'a mut T {
        (self.write)(state)
    }
}

impl<S, T> Clone for Field<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Field<S, T> {}

impl<S, T> fmt::Debug for Field<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.id.name()).finish()
    }
}

impl<S, T> From<Field<S, T>> for FieldId {
    fn from(field: Field<S, T>) -> Self {
        field.id
    }
}

/// A state record usable by [`Store`](crate::Store).
///
/// Implemented by [`store_state!`](crate::store_state); hand-written impls
/// must list every field exactly once.
pub trait StoreState: Clone + 'static {
    /// Every field of the record, in declaration order.
    fn fields() -> &'static [FieldId];

    /// A typed assignment carrying a clone of `field`'s current value.
    ///
    /// Returns `None` for identifiers that do not name a field of `Self`.
    fn assignment(&self, field: FieldId) -> Option<Assignment<Self>>;
}

/// Default "same value" comparison used before any custom equality predicate.
pub trait Identity {
    /// Whether `self` and `other` are the same value for change detection.
    fn is_identical(&self, other: &Self) -> bool;
}

macro_rules! identity_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                #[inline]
                fn is_identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

identity_by_value!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
    &'static str,
);

impl Identity for f32 {
    #[inline]
    fn is_identical(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits() || (self.is_nan() && other.is_nan())
    }
}

impl Identity for f64 {
    #[inline]
    fn is_identical(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits() || (self.is_nan() && other.is_nan())
    }
}

impl<T: ?Sized> Identity for Rc<T> {
    #[inline]
    fn is_identical(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Identity for Arc<T> {
    #[inline]
    fn is_identical(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Identity + ?Sized> Identity for Box<T> {
    fn is_identical(&self, other: &Self) -> bool {
        (**self).is_identical(other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.is_identical(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Identity> Identity for Vec<T> {
    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.is_identical(b))
    }
}

impl<K: Ord, V: Identity> Identity for BTreeMap<K, V> {
    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((ka, va), (kb, vb))| ka == kb && va.is_identical(vb))
    }
}

impl<K: Eq + Hash, V: Identity> Identity for HashMap<K, V> {
    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.is_identical(o)))
    }
}

impl<A: Identity, B: Identity> Identity for (A, B) {
    fn is_identical(&self, other: &Self) -> bool {
        self.0.is_identical(&other.0) && self.1.is_identical(&other.1)
    }
}

impl<A: Identity, B: Identity, C: Identity> Identity for (A, B, C) {
    fn is_identical(&self, other: &Self) -> bool {
        self.0.is_identical(&other.0) && self.1.is_identical(&other.1) && self.2.is_identical(&other.2)
    }
}

/// Implement [`Identity`] for types whose `PartialEq` is the right notion of
/// "unchanged".
///
/// ```ignore
/// #[derive(Clone, PartialEq)]
/// enum Theme { Light, Dark }
/// fieldstore::identity_by_eq!(Theme);
/// ```
#[macro_export]
macro_rules! identity_by_eq {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Identity for $ty {
                #[inline]
                fn is_identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )+
    };
}

/// Declare a state record and its field keys.
///
/// Each field is written `name: Type => KEY`; `KEY` becomes an associated
/// [`Field`] constant on the struct. Every field type must implement
/// [`Identity`] and `Clone`.
///
/// ```ignore
/// fieldstore::store_state! {
///     #[derive(Clone, Debug)]
///     pub struct Counter {
///         pub count: i32 => COUNT,
///         pub label: String => LABEL,
///     }
/// }
///
/// let store = fieldstore::Store::new(Counter { count: 0, label: "clicks".into() });
/// store.set_key(Counter::COUNT, 1);
/// ```
#[macro_export]
macro_rules! store_state {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $key:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $name {
            $(
                #[doc = concat!("Key for the `", stringify!($field), "` field.")]
                pub const $key: $crate::Field<$name, $ty> = {
                    fn read(state: &$name) -> &$ty {
                        &state.$field
                    }
                    fn write(state: &mut $name) -> &mut $ty {
                        &mut state.$field
                    }
                    $crate::Field::new(stringify!($field), read, write)
                };
            )*
        }

        impl $crate::StoreState for $name {
            fn fields() -> &'static [$crate::FieldId] {
                const FIELDS: &[$crate::FieldId] = &[$($crate::FieldId::new(stringify!($field))),*];
                FIELDS
            }

            fn assignment(&self, field: $crate::FieldId) -> ::core::option::Option<$crate::Assignment<Self>> {
                $(
                    if field == Self::$key.id() {
                        return ::core::option::Option::Some($crate::Assignment::new(
                            Self::$key,
                            ::core::clone::Clone::clone(&self.$field),
                        ));
                    }
                )*
                ::core::option::Option::None
            }
        }
    };
}

/// Collect field keys of mixed value types into an array of [`FieldId`]s.
///
/// ```ignore
/// let sub = store.subscribe(&fields![Counter::COUNT, Counter::LABEL], || {});
/// ```
#[macro_export]
macro_rules! fields {
    ($($key:expr),* $(,)?) => {
        [$($crate::FieldId::from($key)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::store_state! {
        #[derive(Clone, Debug, PartialEq)]
        struct Sample {
            count: i32 => COUNT,
            ratio: f64 => RATIO,
            tags: Vec<String> => TAGS,
        }
    }

    #[test]
    fn macro_lists_fields_in_declaration_order() {
        let names: Vec<_> = Sample::fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["count", "ratio", "tags"]);
    }

    #[test]
    fn key_reads_and_writes_its_field() {
        let mut s = Sample {
            count: 1,
            ratio: 0.5,
            tags: vec![],
        };
        assert_eq!(*Sample::COUNT.read(&s), 1);
        *Sample::COUNT.write(&mut s) = 7;
        assert_eq!(s.count, 7);
        assert_eq!(Sample::RATIO.name(), "ratio");
    }

    #[test]
    fn assignment_for_unknown_field_is_none() {
        let s = Sample {
            count: 1,
            ratio: 0.5,
            tags: vec![],
        };
        assert!(s.assignment(FieldId::new("missing")).is_none());
        let a = s.assignment(Sample::TAGS.id()).expect("tags is a field");
        assert_eq!(a.field(), Sample::TAGS.id());
    }

    #[test]
    fn fields_macro_mixes_value_types() {
        let ids = crate::fields![Sample::COUNT, Sample::TAGS];
        assert_eq!(ids, [FieldId::new("count"), FieldId::new("tags")]);
    }

    #[test]
    fn nan_is_identical_to_nan() {
        assert!(f64::NAN.is_identical(&f64::NAN));
        assert!(f32::NAN.is_identical(&(0.0f32 / 0.0)));
        assert!(!0.0f64.is_identical(&-0.0));
        assert!(1.5f64.is_identical(&1.5));
    }

    #[test]
    fn rc_identity_is_pointer_identity() {
        let a = Rc::new(String::from("x"));
        let b = Rc::new(String::from("x"));
        assert!(a.is_identical(&Rc::clone(&a)));
        assert!(!a.is_identical(&b));
    }

    #[test]
    fn containers_compare_structurally() {
        assert!(Some(3u8).is_identical(&Some(3)));
        assert!(!Some(3u8).is_identical(&None));
        assert!(vec![1, 2].is_identical(&vec![1, 2]));
        assert!(!vec![1, 2].is_identical(&vec![1]));
        assert!((1, "a").is_identical(&(1, "a")));
    }

    #[test]
    fn field_id_display_is_name() {
        assert_eq!(Sample::COUNT.id().to_string(), "count");
        assert_eq!(format!("{:?}", Sample::COUNT), "Field(\"count\")");
    }
}
