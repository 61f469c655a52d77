#![forbid(unsafe_code)]

//! Shallow merge of composite field values.
//!
//! [`Store::merge`](crate::Store::merge) is only available for fields whose
//! type implements [`Merge`], so merging into a scalar field does not compile.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

/// A record-like value that can absorb a partial update.
pub trait Merge: Sized {
    /// The partial form accepted by [`merge`](Self::merge).
    type Partial;

    /// A new value: `self` with every entry present in `partial` overwritten.
    fn merge(&self, partial: Self::Partial) -> Self;
}

impl<K: Ord + Clone, V: Clone> Merge for BTreeMap<K, V> {
    type Partial = BTreeMap<K, V>;

    fn merge(&self, partial: Self::Partial) -> Self {
        let mut merged = self.clone();
        merged.extend(partial);
        merged
    }
}

impl<K: Eq + Hash + Clone, V: Clone, H: BuildHasher + Clone> Merge for HashMap<K, V, H> {
    type Partial = HashMap<K, V, H>;

    fn merge(&self, partial: Self::Partial) -> Self {
        let mut merged = self.clone();
        merged.extend(partial);
        merged
    }
}

impl<T: Merge> Merge for Rc<T> {
    type Partial = T::Partial;

    fn merge(&self, partial: Self::Partial) -> Self {
        Rc::new((**self).merge(partial))
    }
}

impl<T: Merge> Merge for Arc<T> {
    type Partial = T::Partial;

    fn merge(&self, partial: Self::Partial) -> Self {
        Arc::new((**self).merge(partial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entries_win() {
        let base = BTreeMap::from([("a", 1), ("b", 2)]);
        let merged = base.merge(BTreeMap::from([("b", 20), ("c", 30)]));
        assert_eq!(merged, BTreeMap::from([("a", 1), ("b", 20), ("c", 30)]));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn rc_merge_allocates_new_value() {
        let base = Rc::new(HashMap::from([("x", 1)]));
        let merged = base.merge(HashMap::from([("y", 2)]));
        assert!(!Rc::ptr_eq(&base, &merged));
        assert_eq!(merged.len(), 2);
    }
}
