#![forbid(unsafe_code)]

//! The persistence middleware and the load path.
//!
//! # Invariants
//!
//! 1. One storage entry per persisted field, keyed `"{prefix}:{field}"`,
//!    holding the JSON text of the field's value.
//! 2. The middleware writes only fields the update actually changes, then
//!    proceeds with the update unchanged.
//! 3. A storage or encoding failure is logged and never blocks the update.
//! 4. Loading omits every field that is missing or fails to load; the other
//!    fields still load.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Encode error | Value not representable as JSON (e.g. non-string map keys) | Logged, write skipped, update commits |
//! | Storage write error | Backend I/O | Logged, update commits |
//! | Missing entry | First run | Field omitted from loaded patch |
//! | Decode error | Schema drift, corrupt entry | Logged, field omitted |

use std::fmt;
use std::rc::Rc;

use fieldstore::{Assignment, Field, FieldId, Identity, Middleware, Patch, Proceed, StoreState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::error::PersistError;
use crate::key::StorageKey;
use crate::storage::Storage;

type Encode<S> = dyn Fn(&Assignment<S>) -> Option<Result<String, serde_json::Error>>;
type Decode<S> = dyn Fn(&str) -> Result<Assignment<S>, serde_json::Error>;

/// JSON encoder/decoder for one field of `S`.
pub struct FieldCodec<S> {
    field: FieldId,
    encode: Rc<Encode<S>>,
    decode: Rc<Decode<S>>,
}

impl<S: StoreState> FieldCodec<S> {
    /// Codec for `key`.
    #[must_use]
    pub fn new<T>(key: Field<S, T>) -> Self
    where
        T: Serialize + DeserializeOwned + Identity + Clone + 'static,
    {
        Self {
            field: key.id(),
            encode: Rc::new(move |assignment: &Assignment<S>| assignment.get(key).map(serde_json::to_string)),
            decode: Rc::new(move |text: &str| {
                serde_json::from_str::<T>(text).map(|value| Assignment::new(key, value))
            }),
        }
    }

    /// The field this codec handles.
    #[must_use]
    pub fn field(&self) -> FieldId {
        self.field
    }

    /// Encode the value of `assignment`. `None` if it targets another field.
    pub fn encode(&self, assignment: &Assignment<S>) -> Option<Result<String, serde_json::Error>> {
        (self.encode)(assignment)
    }

    /// Decode stored text into an assignment of this codec's field.
    pub fn decode(&self, text: &str) -> Result<Assignment<S>, serde_json::Error> {
        (self.decode)(text)
    }
}

impl<S> Clone for FieldCodec<S> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            encode: Rc::clone(&self.encode),
            decode: Rc::clone(&self.decode),
        }
    }
}

impl<S> fmt::Debug for FieldCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldCodec").field(&self.field).finish()
    }
}

/// Read and decode one persisted field.
///
/// `Ok(None)` when the storage has no entry for it.
pub fn load_field<S: StoreState, St: Storage + ?Sized>(
    storage: &St,
    prefix: &str,
    codec: &FieldCodec<S>,
) -> Result<Option<Assignment<S>>, PersistError> {
    let key = StorageKey::new(prefix, codec.field()).to_string();
    let text = match storage.get_item(&key) {
        Ok(Some(text)) => text,
        Ok(None) => return Ok(None),
        Err(source) => return Err(PersistError::Storage { key, source }),
    };
    codec
        .decode(&text)
        .map(Some)
        .map_err(|source| PersistError::Deserialize { key, source })
}

/// Load every field in `codecs` from `storage` into a patch.
///
/// Fields that are missing or fail to load are omitted; failures are
/// logged. Apply the result to default state to build a store's initial
/// value.
pub fn load_state<S: StoreState, St: Storage + ?Sized>(
    storage: &St,
    prefix: &str,
    codecs: &[FieldCodec<S>],
) -> Patch<S> {
    let mut patch = Patch::new();
    for codec in codecs {
        match load_field(storage, prefix, codec) {
            Ok(Some(assignment)) => patch.push(assignment),
            Ok(None) => trace!(prefix, field = %codec.field(), "no persisted value"),
            Err(error) => warn!(prefix, field = %codec.field(), %error, "persisted value not loaded"),
        }
    }
    debug!(prefix, loaded = patch.len(), requested = codecs.len(), "persisted state loaded");
    patch
}

/// Encode and store one assignment.
pub fn save_field<S: StoreState, St: Storage + ?Sized>(
    storage: &St,
    prefix: &str,
    codec: &FieldCodec<S>,
    assignment: &Assignment<S>,
) -> Result<(), PersistError> {
    let key = StorageKey::new(prefix, codec.field()).to_string();
    let Some(encoded) = codec.encode(assignment) else {
        return Ok(());
    };
    let text = encoded.map_err(|source| PersistError::Serialize {
        key: key.clone(),
        source,
    })?;
    storage
        .set_item(&key, &text)
        .map_err(|source| PersistError::Storage { key, source })
}

/// Builder for a persistence middleware over a set of fields.
///
/// ```ignore
/// let persist = Persist::new("app", MemoryStorage::new())
///     .field(Settings::THEME)
///     .field(Settings::VOLUME);
/// let initial = persist.load().applied_to(Settings::default());
/// let store = Store::new(initial);
/// store.add_middleware(persist.into_middleware());
/// ```
pub struct Persist<S, St> {
    prefix: String,
    storage: St,
    codecs: Vec<FieldCodec<S>>,
}

impl<S: StoreState, St: Storage + 'static> Persist<S, St> {
    /// Persist under `prefix` into `storage`. No fields yet.
    #[must_use]
    pub fn new(prefix: impl Into<String>, storage: St) -> Self {
        Self {
            prefix: prefix.into(),
            storage,
            codecs: Vec::new(),
        }
    }

    /// Persist `key` as well. Registering a field twice keeps one codec.
    #[must_use]
    pub fn field<T>(mut self, key: Field<S, T>) -> Self
    where
        T: Serialize + DeserializeOwned + Identity + Clone + 'static,
    {
        let codec = FieldCodec::new(key);
        match self.codecs.iter_mut().find(|c| c.field == codec.field) {
            Some(existing) => *existing = codec,
            None => self.codecs.push(codec),
        }
        self
    }

    /// The storage prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The persisted fields, in registration order.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldId> {
        self.codecs.iter().map(FieldCodec::field).collect()
    }

    /// Storage key of `field` under this prefix.
    #[must_use]
    pub fn key_for(&self, field: impl Into<FieldId>) -> StorageKey {
        StorageKey::new(self.prefix.as_str(), field)
    }

    /// The backend.
    #[must_use]
    pub fn storage(&self) -> &St {
        &self.storage
    }

    /// Load the persisted fields. See [`load_state`].
    #[must_use]
    pub fn load(&self) -> Patch<S> {
        load_state(&self.storage, &self.prefix, &self.codecs)
    }

    /// Write every persisted field of `state`, whether or not it changed.
    ///
    /// Returns the failures; fields that saved are not listed.
    pub fn save_all(&self, state: &S) -> Vec<PersistError> {
        self.codecs
            .iter()
            .filter_map(|codec| {
                let assignment = state.assignment(codec.field)?;
                save_field(&self.storage, &self.prefix, codec, &assignment).err()
            })
            .collect()
    }

    /// A middleware that writes each changed persisted field and proceeds.
    ///
    /// It is filtered to the persisted fields, so updates touching none of
    /// them never reach it.
    #[must_use]
    pub fn into_middleware(self) -> Middleware<S> {
        let fields = self.fields();
        let name = format!("persist:{}", self.prefix);
        let Self {
            prefix,
            storage,
            codecs,
        } = self;
        Middleware::new(move |state: &S, update: &Patch<S>, next: &mut Proceed<S>| {
            for codec in &codecs {
                let Some(assignment) = update.assignment(codec.field) else {
                    continue;
                };
                if assignment.is_identical_in(state) {
                    continue;
                }
                match save_field(&storage, &prefix, codec, assignment) {
                    Ok(()) => trace!(prefix = %prefix, field = %codec.field, "field persisted"),
                    Err(error) => {
                        warn!(prefix = %prefix, field = %codec.field, %error, "persist failed; update continues");
                    }
                }
            }
            next.proceed();
            Ok(())
        })
        .for_fields(&fields)
        .named(name)
    }
}

impl<S, St: fmt::Debug> fmt::Debug for Persist<S, St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persist")
            .field("prefix", &self.prefix)
            .field("storage", &self.storage)
            .field("codecs", &self.codecs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fieldstore::store_state! {
        #[derive(Clone, Debug, PartialEq)]
        struct Prefs {
            theme: String => THEME,
            volume: u8 => VOLUME,
        }
    }

    #[test]
    fn codec_round_trips_through_json_text() {
        let codec = FieldCodec::new(Prefs::THEME);
        let assignment = Assignment::new(Prefs::THEME, "dark".to_string());
        let text = codec.encode(&assignment).unwrap().unwrap();
        assert_eq!(text, "\"dark\"");
        let decoded = codec.decode(&text).unwrap();
        assert_eq!(decoded.get(Prefs::THEME).map(String::as_str), Some("dark"));
    }

    #[test]
    fn codec_ignores_other_fields() {
        let codec = FieldCodec::new(Prefs::THEME);
        assert!(codec.encode(&Assignment::new(Prefs::VOLUME, 3)).is_none());
    }

    #[test]
    fn duplicate_field_registration_keeps_one_codec() {
        let persist = Persist::<Prefs, _>::new("app", MemoryStorage::new())
            .field(Prefs::THEME)
            .field(Prefs::THEME);
        assert_eq!(persist.fields(), vec![Prefs::THEME.id()]);
        assert_eq!(persist.key_for(Prefs::THEME).to_string(), "app:theme");
    }

    #[test]
    fn save_all_writes_every_field() {
        let storage = MemoryStorage::new();
        let persist = Persist::new("p", storage.clone())
            .field(Prefs::THEME)
            .field(Prefs::VOLUME);
        let errors = persist.save_all(&Prefs {
            theme: "light".into(),
            volume: 7,
        });
        assert!(errors.is_empty());
        assert_eq!(storage.get_item("p:volume").unwrap().as_deref(), Some("7"));
        assert_eq!(storage.get_item("p:theme").unwrap().as_deref(), Some("\"light\""));
    }
}
