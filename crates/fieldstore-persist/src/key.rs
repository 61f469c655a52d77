//! Storage keys for persisted fields.

use std::fmt;

use fieldstore::FieldId;

/// Identifier of one persisted field: `(prefix, field)`.
///
/// The prefix namespaces one store's entries from another's within a shared
/// backend. The textual form is `"{prefix}:{field}"`:
///
/// ```ignore
/// let key = StorageKey::new("app", Settings::THEME);
/// assert_eq!(key.to_string(), "app:theme");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey {
    /// Namespace shared by all fields of one store.
    pub prefix: String,
    /// The persisted field.
    pub field: FieldId,
}

impl StorageKey {
    /// Create a key for `field` under `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>, field: impl Into<FieldId>) -> Self {
        Self {
            prefix: prefix.into(),
            field: field.into(),
        }
    }

    /// Canonical string form, identical to `Display`.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.field)
    }
}
