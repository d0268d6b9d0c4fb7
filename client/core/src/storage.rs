//! Durable Storage
//!
//! A small async key/value seam for the state that must survive a restart:
//! per-session draft slots and the offline queue.
//!
//! - [`FileStore`]: one file per key under a state directory
//! - [`MemoryStore`]: concurrent in-memory map for tests and ephemeral runs
//!
//! [`DraftMirror`] sits on top and debounces draft writes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messages::SessionId;

/// Key of the offline queue slot
pub const OFFLINE_QUEUE_KEY: &str = "offline_queue";

/// Default debounce for draft mirroring
pub const DEFAULT_DRAFT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Key of a session's durable draft slot
#[must_use]
pub fn draft_key(session: &SessionId) -> String {
    format!("draft:{session}")
}

/// Errors from durable storage
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("Storage I/O failed for {key}: {source}")]
    Io {
        /// Key being accessed
        key: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Stored value could not be (de)serialized
    #[error("Stored value is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Async key/value persistence
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a value; `None` when the key is absent
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key; removing an absent key succeeds
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key, named by the hex encoding of the key
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key)))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(key, e))?;

        // Write-then-rename so a crash never leaves a torn value behind
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

/// In-memory store
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek, for assertions
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Debounced mirror of draft text into `draft:{session}` slots
///
/// Every keystroke reschedules the write for that session; only the last
/// text within the debounce window reaches the store. Pending writes for
/// other sessions are unaffected.
///
/// Each session slot carries a generation counter and a write lock. A
/// debounced write only lands if no newer schedule or immediate write has
/// happened since it was scheduled, and immediate writes wait for any store
/// call already in progress, so a stale write can never land after them.
pub struct DraftMirror {
    store: Arc<dyn DurableStore>,
    debounce: Duration,
    slots: DashMap<SessionId, Arc<DraftSlot>>,
}

#[derive(Default)]
struct DraftSlot {
    generation: AtomicU64,
    lock: Mutex<()>,
}

impl DraftSlot {
    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl DraftMirror {
    /// Create a mirror over `store`
    pub fn new(store: Arc<dyn DurableStore>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            slots: DashMap::new(),
        }
    }

    /// Schedule `text` to be written after the debounce window
    ///
    /// Empty text removes the slot instead.
    pub fn schedule(&self, session: &SessionId, text: &str) {
        let slot = self.slot(session);
        let generation = slot.bump();
        let store = Arc::clone(&self.store);
        let key = draft_key(session);
        let text = text.to_string();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _guard = slot.lock.lock().await;
            if !slot.is_current(generation) {
                return;
            }
            let result = if text.is_empty() {
                store.remove(&key).await
            } else {
                store.write(&key, &text).await
            };
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "Draft mirror write failed");
            }
        });
    }

    /// Supersede any pending write and delete the slot now
    ///
    /// # Errors
    ///
    /// Returns the store error if the slot could not be removed.
    pub async fn clear_now(&self, session: &SessionId) -> Result<(), StorageError> {
        let slot = self.slot(session);
        slot.bump();
        let _guard = slot.lock.lock().await;
        self.store.remove(&draft_key(session)).await
    }

    /// Supersede any pending write and store `text` now
    ///
    /// # Errors
    ///
    /// Returns the store error if the slot could not be written.
    pub async fn write_now(&self, session: &SessionId, text: &str) -> Result<(), StorageError> {
        let slot = self.slot(session);
        slot.bump();
        let _guard = slot.lock.lock().await;
        self.store.write(&draft_key(session), text).await
    }

    /// Read the durable slot
    ///
    /// # Errors
    ///
    /// Returns the store error if the slot could not be read.
    pub async fn load(&self, session: &SessionId) -> Result<Option<String>, StorageError> {
        self.store.read(&draft_key(session)).await
    }

    fn slot(&self, session: &SessionId) -> Arc<DraftSlot> {
        Arc::clone(self.slots.entry(session.clone()).or_default().value())
    }
}
