#![forbid(unsafe_code)]

//! Storage-backed persistence for [`fieldstore`] stores.
//!
//! - [`Storage`]: text key/value backend, with [`MemoryStorage`],
//!   [`FileStorage`] and the fire-and-forget [`BackgroundStorage`].
//! - [`Persist`]: builder producing a middleware that mirrors changed fields
//!   to storage, plus the load path used to build initial state.
//!
//! Each persisted field is one entry keyed `"{prefix}:{field}"` whose value
//! is the field's JSON text, so writing `theme = "dark"` under prefix
//! `app` stores `"dark"` (with quotes) at `app:theme`.

pub mod error;
pub mod key;
pub mod persist;
pub mod storage;

pub use error::{PersistError, StorageError};
pub use key::StorageKey;
pub use persist::{FieldCodec, Persist, load_field, load_state, save_field};
pub use storage::{BackgroundStorage, FileStorage, MemoryStorage, Storage};
