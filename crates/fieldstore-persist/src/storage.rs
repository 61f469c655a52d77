#![forbid(unsafe_code)]

//! Key/value text storage backends.
//!
//! # Failure Modes
//!
//! | Failure | Backend | Behavior |
//! |---------|---------|----------|
//! | Missing entry | all | `get_item` returns `Ok(None)` |
//! | I/O error | [`FileStorage`] | `StorageError::Io` |
//! | Poisoned lock | [`MemoryStorage`] | `StorageError::PoisonedLock` |
//! | Write fails in worker | [`BackgroundStorage`] | Logged on the worker; caller never sees it |
//! | Worker stopped | [`BackgroundStorage`] | `StorageError::WorkerGone` |

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::StorageError;

/// Text storage keyed by string.
pub trait Storage {
    /// Read the entry for `key`, if any.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Create or overwrite the entry for `key`.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

impl<T: Storage + ?Sized> Storage for &T {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }
}

impl<T: Storage + ?Sized> Storage for Rc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-memory storage. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::PoisonedLock)?;
        Ok(entries.clone())
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::PoisonedLock)?;
        Ok(entries.len())
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::PoisonedLock)?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::PoisonedLock)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// One file per entry in a directory.
///
/// Keys are percent-encoded into file names, so any key is accepted. Writes
/// go to a temporary file that is then renamed over the entry, so a reader
/// never observes a half-written value.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` as the storage directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_name(key)))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Keep `[A-Za-z0-9_.-]`, percent-encode every other byte.
fn encode_file_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// BackgroundStorage
// ---------------------------------------------------------------------------

enum Command {
    Write { key: String, value: String },
    Flush(mpsc::Sender<()>),
}

/// Fire-and-forget writes on a worker thread.
///
/// `set_item` queues the write and returns at once; the worker applies
/// writes in order and logs failures. `get_item` waits until every write
/// queued before it has been applied, then reads the inner backend.
///
/// Dropping the storage drains the queue and joins the worker.
pub struct BackgroundStorage<St> {
    inner: Arc<St>,
    tx: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl<St: Storage + Send + Sync + 'static> BackgroundStorage<St> {
    /// Start a worker writing to `inner`.
    pub fn spawn(inner: St) -> Result<Self, StorageError> {
        let inner = Arc::new(inner);
        let (tx, rx) = mpsc::channel::<Command>();
        let target = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("fieldstore-persist".into())
            .spawn(move || {
                for command in rx {
                    match command {
                        Command::Write { key, value } => {
                            if let Err(error) = target.set_item(&key, &value) {
                                warn!(key = %key, %error, "background storage write failed");
                            }
                        }
                        Command::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                debug!("background storage worker stopped");
            })?;
        Ok(Self {
            inner,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Block until every write queued so far has been applied.
    pub fn flush(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(Command::Flush(ack_tx))?;
        ack_rx.recv().map_err(|_| StorageError::WorkerGone)
    }

    /// The backend the worker writes to.
    #[must_use]
    pub fn inner(&self) -> &St {
        &self.inner
    }

    fn send(&self, command: Command) -> Result<(), StorageError> {
        let tx = self.tx.as_ref().ok_or(StorageError::WorkerGone)?;
        tx.send(command).map_err(|_| StorageError::WorkerGone)
    }
}

impl<St: Storage + Send + Sync + 'static> Storage for BackgroundStorage<St> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.flush()?;
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.send(Command::Write {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }
}

impl<St> Drop for BackgroundStorage<St> {
    fn drop(&mut self) {
        // Closing the channel ends the worker's loop after the queue drains.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<St> fmt::Debug for BackgroundStorage<St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundStorage")
            .field("running", &self.worker.as_ref().is_some_and(|w| !w.is_finished()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.set_item("app:theme", "\"dark\"").unwrap();
        assert_eq!(other.get_item("app:theme").unwrap().as_deref(), Some("\"dark\""));
        assert_eq!(other.get_item("app:missing").unwrap(), None);
        assert_eq!(other.len().unwrap(), 1);
    }

    #[test]
    fn poisoned_memory_reports_errors() {
        let storage = MemoryStorage::new();
        storage.set_item("k", "1").unwrap();
        let shared = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.entries.lock().unwrap();
            panic!("poison the map");
        })
        .join();

        assert!(matches!(storage.len(), Err(StorageError::PoisonedLock)));
        assert!(matches!(storage.is_empty(), Err(StorageError::PoisonedLock)));
        assert!(matches!(storage.snapshot(), Err(StorageError::PoisonedLock)));
        assert!(matches!(storage.get_item("k"), Err(StorageError::PoisonedLock)));
    }

    #[test]
    fn file_names_are_encoded() {
        assert_eq!(encode_file_name("app:theme"), "app%3Atheme");
        assert_eq!(encode_file_name("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_file_name("plain-name_1.x"), "plain-name_1.x");
    }

    #[test]
    fn pointer_impls_forward() {
        let storage = Rc::new(MemoryStorage::new());
        let by_ref = &*storage;
        by_ref.set_item("k", "1").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn background_writes_are_visible_after_flush() {
        let memory = MemoryStorage::new();
        let storage = BackgroundStorage::spawn(memory.clone()).unwrap();
        storage.set_item("k", "1").unwrap();
        storage.set_item("k", "2").unwrap();
        storage.flush().unwrap();
        assert_eq!(memory.get_item("k").unwrap().as_deref(), Some("2"));
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn background_drop_drains_queue() {
        let memory = MemoryStorage::new();
        let storage = BackgroundStorage::spawn(memory.clone()).unwrap();
        for i in 0..50 {
            storage.set_item(&format!("k{i}"), "x").unwrap();
        }
        drop(storage);
        assert_eq!(memory.len().unwrap(), 50);
    }
}
