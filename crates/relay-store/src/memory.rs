use parking_lot::Mutex;

use relay_core::ChatMessage;

use crate::error::StoreError;
use crate::messages::MessageStore;

/// In-memory `MessageStore` for tests and `--memory` runs.
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot of everything appended so far, in append order.
    pub fn all(&self) -> Vec<ChatMessage> {
        self.inner.lock().clone()
    }
}

impl MessageStore for MemoryMessageStore {
    fn append(&self, msg: &ChatMessage) -> Result<(), StoreError> {
        self.inner.lock().push(msg.clone());
        Ok(())
    }

    fn list_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.lock();
        let skip = inner.len().saturating_sub(limit as usize);
        Ok(inner[skip..].to_vec())
    }
}

/// Store that rejects every append, for exercising persistence-failure paths.
#[derive(Default)]
pub struct FailingMessageStore;

impl MessageStore for FailingMessageStore {
    fn append(&self, _msg: &ChatMessage) -> Result<(), StoreError> {
        Err(StoreError::Database("append rejected".into()))
    }

    fn list_recent(&self, _limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        Err(StoreError::Database("list rejected".into()))
    }
}
