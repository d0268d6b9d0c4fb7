//! Offline Queue
//!
//! Messages composed while offline are never transmitted automatically.
//! They are persisted under [`OFFLINE_QUEUE_KEY`] and, once the network is
//! back, handed back to the user as draft text to review and resend.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::messages::now_ms;
use crate::storage::{DurableStore, StorageError, OFFLINE_QUEUE_KEY};

/// Separator between restored messages in the draft
pub const RESTORE_SEPARATOR: &str = "\n\n";

/// One message that could not be sent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
    /// The message text
    pub message: String,
    /// When it was queued (Unix ms)
    pub timestamp: u64,
}

impl OfflineQueueItem {
    /// Queue `message` now
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: now_ms(),
        }
    }
}

/// The persisted queue
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn DurableStore>,
}

impl OfflineQueue {
    /// Queue persisted in `store`
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Current contents, oldest first
    ///
    /// A corrupt slot is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns the store error if the slot could not be read.
    pub async fn load(&self) -> Result<Vec<OfflineQueueItem>, StorageError> {
        let Some(raw) = self.store.read(OFFLINE_QUEUE_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding corrupt offline queue");
                Ok(Vec::new())
            }
        }
    }

    /// Append an item and persist; returns the new queue length
    ///
    /// # Errors
    ///
    /// Returns the store error if the queue could not be read or written.
    pub async fn enqueue(&self, item: OfflineQueueItem) -> Result<usize, StorageError> {
        let mut items = self.load().await?;
        items.push(item);
        let encoded = serde_json::to_string(&items)?;
        self.store.write(OFFLINE_QUEUE_KEY, &encoded).await?;
        Ok(items.len())
    }

    /// Remove and return everything queued
    ///
    /// # Errors
    ///
    /// Returns the store error if the queue could not be read or cleared.
    pub async fn take_all(&self) -> Result<Vec<OfflineQueueItem>, StorageError> {
        let items = self.load().await?;
        self.store.remove(OFFLINE_QUEUE_KEY).await?;
        Ok(items)
    }
}

/// Merge restored messages into the existing draft
///
/// Non-empty pieces are joined with a blank line, existing draft text first.
#[must_use]
pub fn restore_into_draft(existing: &str, items: &[OfflineQueueItem]) -> String {
    join_draft(existing, items.iter().map(|item| item.message.as_str()))
}

/// Append `pieces` to `existing` with the same rule as [`restore_into_draft`]
#[must_use]
pub fn join_draft<'a, I>(existing: &'a str, pieces: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    std::iter::once(existing)
        .chain(pieces)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(RESTORE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_enqueue_persists_json_array() {
        let store = MemoryStore::new();
        let queue = OfflineQueue::new(Arc::new(store.clone()));

        assert_eq!(queue.enqueue(OfflineQueueItem::new("first")).await.unwrap(), 1);
        assert_eq!(queue.enqueue(OfflineQueueItem::new("second")).await.unwrap(), 2);

        let raw = store.get(OFFLINE_QUEUE_KEY).unwrap();
        let decoded: Vec<OfflineQueueItem> = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded[0].message, "first");
        assert_eq!(decoded[1].message, "second");
    }

    #[tokio::test]
    async fn test_take_all_clears_slot() {
        let store = MemoryStore::new();
        let queue = OfflineQueue::new(Arc::new(store.clone()));
        queue.enqueue(OfflineQueueItem::new("x")).await.unwrap();

        let items = queue.take_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(store.get(OFFLINE_QUEUE_KEY).is_none());
        assert!(queue.take_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_queue_is_empty() {
        let store = MemoryStore::new();
        store.write(OFFLINE_QUEUE_KEY, "{oops").await.unwrap();
        let queue = OfflineQueue::new(Arc::new(store));
        assert!(queue.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_restore_into_draft() {
        let items = vec![OfflineQueueItem::new("one"), OfflineQueueItem::new("two")];
        assert_eq!(restore_into_draft("", &items), "one\n\ntwo");
        assert_eq!(restore_into_draft("draft", &items), "draft\n\none\n\ntwo");
        assert_eq!(restore_into_draft("draft", &[]), "draft");
    }

    #[test]
    fn test_join_draft_skips_blank_pieces() {
        assert_eq!(join_draft("  ", ["draw a cat"]), "draw a cat");
        assert_eq!(join_draft("x", ["", "y"]), "x\n\ny");
    }
}
